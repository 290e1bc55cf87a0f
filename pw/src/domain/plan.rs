//! Plan domain type
//!
//! The top-level unit of work: a user intent, the planning artifacts gathered
//! while clarifying it, and the execution graph derived from it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use planstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::id::{generate_item_id, generate_session_id};
use super::step::{ExecutionStep, StepId, StepStatus};

/// Plan lifecycle status
///
/// Status only moves forward. COMPLETED and FAILED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    #[default]
    Brainstorming,
    AwaitingApproval,
    Approved,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Brainstorming => 0,
            Self::AwaitingApproval => 1,
            Self::Approved => 2,
            Self::Executing => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving to `next` keeps the lifecycle monotonic
    pub fn can_advance_to(&self, next: PlanStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brainstorming => "BRAINSTORMING",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "BRAINSTORMING" => Ok(Self::Brainstorming),
            "AWAITING_APPROVAL" => Ok(Self::AwaitingApproval),
            "APPROVED" => Ok(Self::Approved),
            "EXECUTING" => Ok(Self::Executing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown plan status: {}", other)),
        }
    }
}

/// Rejected plan status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Plan status cannot move from {from} to {to}")]
pub struct StatusError {
    pub from: PlanStatus,
    pub to: PlanStatus,
}

/// A clarifying question raised while analyzing the intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenQuestion {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answered: bool,
    #[serde(default)]
    pub answer: Option<String>,
}

impl OpenQuestion {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: generate_item_id(),
            question: question.into(),
            answered: false,
            answer: None,
        }
    }
}

/// A high-level alternative approach offered before decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrawmanProposal {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub selected: bool,
}

/// Where an external context entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Github,
    WebSearch,
    FileUpload,
}

impl fmt::Display for ContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Github => write!(f, "github"),
            Self::WebSearch => write!(f, "web_search"),
            Self::FileUpload => write!(f, "file_upload"),
        }
    }
}

/// Supplementary material attached to a plan for the planner prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalContext {
    pub id: String,
    pub source_type: ContextSource,
    #[serde(default)]
    pub source_url: Option<String>,
    pub content_summary: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: i64,
}

impl ExternalContext {
    pub fn new(source_type: ContextSource, source_url: Option<String>, content_summary: impl Into<String>) -> Self {
        Self {
            id: generate_item_id(),
            source_type,
            source_url,
            content_summary: content_summary.into(),
            metadata: BTreeMap::new(),
            created_at: now_ms(),
        }
    }
}

/// A planning session and its execution graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub session_id: String,

    #[serde(default)]
    pub status: PlanStatus,

    pub user_intent: String,

    #[serde(default)]
    pub scenario_name: Option<String>,

    /// Decisions fixed during planning, passed through to every step prompt
    #[serde(default)]
    pub locked_constraints: BTreeMap<String, Value>,

    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,

    #[serde(default)]
    pub strawman_proposals: Vec<StrawmanProposal>,

    /// Steps in authoring order (not execution order)
    #[serde(default)]
    pub execution_graph: Vec<ExecutionStep>,

    #[serde(default)]
    pub external_contexts: Vec<ExternalContext>,

    /// Per-session planner model override
    #[serde(default)]
    pub planner_model: Option<String>,

    /// Per-session executor model override
    #[serde(default)]
    pub executor_model: Option<String>,

    /// `step_{id}` -> output, set only on successful completion
    #[serde(default)]
    pub final_output: Option<BTreeMap<String, String>>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Plan {
    /// Create a new plan in BRAINSTORMING with a generated session id
    pub fn new(user_intent: impl Into<String>, scenario_name: Option<String>) -> Self {
        let now = now_ms();
        let plan = Self {
            session_id: generate_session_id(),
            status: PlanStatus::Brainstorming,
            user_intent: user_intent.into(),
            scenario_name,
            locked_constraints: BTreeMap::new(),
            open_questions: Vec::new(),
            strawman_proposals: Vec::new(),
            execution_graph: Vec::new(),
            external_contexts: Vec::new(),
            planner_model: None,
            executor_model: None,
            final_output: None,
            created_at: now,
            updated_at: now,
        };
        debug!(session_id = %plan.session_id, "Plan::new: created");
        plan
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at);
    }

    /// Move status forward, rejecting backward or post-terminal moves
    pub fn advance_status(&mut self, next: PlanStatus) -> Result<(), StatusError> {
        debug!(session_id = %self.session_id, from = %self.status, to = %next, "advance_status: called");
        if !self.status.can_advance_to(next) {
            return Err(StatusError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn add_step(&mut self, step: ExecutionStep) {
        self.execution_graph.push(step);
        self.touch();
    }

    pub fn add_open_question(&mut self, question: impl Into<String>) {
        self.open_questions.push(OpenQuestion::new(question));
        self.touch();
    }

    pub fn lock_constraint(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.locked_constraints.insert(key.into(), value.into());
        self.touch();
    }

    pub fn step(&self, step_id: StepId) -> Option<&ExecutionStep> {
        self.execution_graph.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: StepId) -> Option<&mut ExecutionStep> {
        self.execution_graph.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Ids of every COMPLETED step
    pub fn completed_step_ids(&self) -> BTreeSet<StepId> {
        self.execution_graph
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.step_id)
            .collect()
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.execution_graph.iter().filter(|s| s.status == StepStatus::Pending)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.execution_graph.iter().filter(|s| s.status == StepStatus::Failed)
    }

    /// Every step is COMPLETED or SKIPPED
    pub fn all_steps_done(&self) -> bool {
        self.execution_graph.iter().all(|s| s.status.is_done())
    }

    pub fn unanswered_questions(&self) -> impl Iterator<Item = &OpenQuestion> {
        self.open_questions.iter().filter(|q| !q.answered)
    }

    pub fn has_unanswered_questions(&self) -> bool {
        self.unanswered_questions().next().is_some()
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&StrawmanProposal> {
        self.strawman_proposals.iter().find(|p| p.id == proposal_id)
    }

    /// Lowercased text used for free-text search in listings
    pub fn search_text(&self) -> String {
        let mut text = self.user_intent.to_lowercase();
        if let Some(ref scenario) = self.scenario_name {
            text.push(' ');
            text.push_str(&scenario.to_lowercase());
        }
        text
    }
}

impl Record for Plan {
    fn id(&self) -> &str {
        &self.session_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "plans"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        debug!(session_id = %self.session_id, "Plan::indexed_fields: called");
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("user_intent".to_string(), IndexValue::String(self.user_intent.clone()));
        if let Some(ref scenario) = self.scenario_name {
            fields.insert("scenario_name".to_string(), IndexValue::String(scenario.clone()));
        }
        fields.insert("search".to_string(), IndexValue::String(self.search_text()));
        fields
    }
}
