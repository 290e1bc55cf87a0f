//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use super::repository::{PlanPage, PlanQuery};
use crate::domain::Plan;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    SavePlan {
        plan: Box<Plan>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetPlan {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Plan>>>,
    },
    ListPlans {
        query: PlanQuery,
        reply: oneshot::Sender<StateResponse<PlanPage>>,
    },
    ListSessionIds {
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    DeletePlan {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    RebuildIndexes {
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    Shutdown,
}
