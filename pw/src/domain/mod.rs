//! Domain types for PlanWeaver
//!
//! `Plan` owns an ordered execution graph of `ExecutionStep`s. Plans implement
//! the planstore `Record` trait so the state actor can persist them.

mod id;
mod plan;
mod step;

pub use id::{SESSION_PREFIX, generate_item_id, generate_session_id, resolve_session_id};
pub use plan::{ContextSource, ExternalContext, OpenQuestion, Plan, PlanStatus, StatusError, StrawmanProposal};
pub use step::{DEFAULT_TEMPLATE_ID, ExecutionStep, StepId, StepStatus, TransitionError};
