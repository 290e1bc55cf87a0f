//! Execution router
//!
//! Validates a plan's dependency graph, computes which steps are ready, runs
//! steps with bounded retries, and drives the fail-fast plan loop.
//!
//! The router never stores plans. Callers hand in a `&mut Plan` and persist
//! it afterwards.

mod config;
mod engine;
mod executor;
mod recovery;
mod scheduler;
mod validation;

pub use config::{RetryPolicy, RouterConfig};
pub use engine::{ExecutionError, ExecutionReport, ExecutionRouter, aggregate_outputs};
pub use executor::{Prepared, PreparedStep, StepError, StepExecutor, StepOutcome, previous_outputs, resolve_model};
pub use recovery::{DEFAULT_STUCK_AFTER, StuckStep, find_stuck_steps, recover_stuck_steps};
pub use scheduler::{executable_step_ids, get_executable_steps};
pub use validation::{GraphError, validate_graph};
