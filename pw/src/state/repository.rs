//! Plan persistence seam
//!
//! The orchestrator talks to storage only through `PlanRepository`, which
//! keeps it testable and lets the state actor stay the single writer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::messages::StateResponse;
use crate::domain::{Plan, PlanStatus};

/// Default page size for session listings
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Filters and paging for `list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanQuery {
    /// Exact status match
    pub status: Option<PlanStatus>,

    /// Case-insensitive substring of the intent or scenario name
    pub query: Option<String>,

    pub limit: usize,
    pub offset: usize,
}

impl Default for PlanQuery {
    fn default() -> Self {
        Self {
            status: None,
            query: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

/// Listing view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub session_id: String,
    pub status: PlanStatus,
    pub user_intent: String,
    pub scenario_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            session_id: plan.session_id.clone(),
            status: plan.status,
            user_intent: plan.user_intent.clone(),
            scenario_name: plan.scenario_name.clone(),
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

/// One page of summaries, most recently updated first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPage {
    pub sessions: Vec<PlanSummary>,
    /// Matches before paging
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Storage for plans
#[async_trait]
pub trait PlanRepository: Send + Sync {
    /// Insert or replace a plan
    async fn save(&self, plan: &Plan) -> StateResponse<()>;

    async fn get(&self, session_id: &str) -> StateResponse<Option<Plan>>;

    async fn list(&self, query: PlanQuery) -> StateResponse<PlanPage>;

    /// Ids of every stored session
    async fn session_ids(&self) -> StateResponse<Vec<String>>;

    async fn delete(&self, session_id: &str) -> StateResponse<bool>;
}
