//! State management with actor pattern
//!
//! StateManager owns the plan store and processes messages via channels,
//! providing thread-safe access to persistent state.

mod manager;
mod messages;
mod repository;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use repository::{DEFAULT_LIST_LIMIT, PlanPage, PlanQuery, PlanRepository, PlanSummary};
