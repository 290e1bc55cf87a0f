//! ExecutionStep domain type
//!
//! A single node of a plan's execution graph, bound to one LLM call.
//! Steps are mutated in place; the only transitions are
//! PENDING -> IN_PROGRESS -> {COMPLETED, FAILED}.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Identifier of a step, unique within one plan
pub type StepId = u32;

/// Template id used when a step does not name one
pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// Step lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Waiting for dependencies or for the loop to pick it up
    #[default]
    Pending,
    /// LLM call in flight
    InProgress,
    /// Output recorded
    Completed,
    /// All attempts exhausted (or interrupted)
    Failed,
    /// Skipped by the planner; counts as done for plan completion
    Skipped,
}

impl StepStatus {
    /// Whether the step has reached a state the loop never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Whether the step counts as done when deciding plan completion
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected step status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Step {step_id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub step_id: StepId,
    pub from: StepStatus,
    pub to: StepStatus,
}

/// One unit of work in a plan's dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: StepId,

    /// Human-readable task, rendered into the executor prompt
    pub task: String,

    /// Scenario/template used to render the prompt
    #[serde(default = "default_template_id")]
    pub prompt_template_id: String,

    /// Model that executes this step unless overridden
    pub assigned_model: String,

    /// Steps that must be COMPLETED before this one is eligible
    #[serde(default)]
    pub dependencies: BTreeSet<StepId>,

    #[serde(default)]
    pub status: StepStatus,

    /// Set only when COMPLETED
    #[serde(default)]
    pub output: Option<String>,

    /// Set only when FAILED
    #[serde(default)]
    pub error: Option<String>,

    /// Unix milliseconds when the step entered IN_PROGRESS
    #[serde(default)]
    pub started_at: Option<i64>,

    /// Unix milliseconds when the step left IN_PROGRESS
    #[serde(default)]
    pub completed_at: Option<i64>,
}

fn default_template_id() -> String {
    DEFAULT_TEMPLATE_ID.to_string()
}

impl ExecutionStep {
    /// Create a pending step with no dependencies
    pub fn new(step_id: StepId, task: impl Into<String>, assigned_model: impl Into<String>) -> Self {
        Self {
            step_id,
            task: task.into(),
            prompt_template_id: default_template_id(),
            assigned_model: assigned_model.into(),
            dependencies: BTreeSet::new(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = StepId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.prompt_template_id = template_id.into();
        self
    }

    /// Check if the step can run given the set of completed step ids
    pub fn is_ready(&self, completed: &BTreeSet<StepId>) -> bool {
        self.status == StepStatus::Pending && self.dependencies.is_subset(completed)
    }

    /// PENDING -> IN_PROGRESS, stamping `started_at`
    pub fn start(&mut self, now_ms: i64) -> Result<(), TransitionError> {
        debug!(step_id = self.step_id, "start: called");
        self.check_transition(StepStatus::Pending, StepStatus::InProgress)?;
        self.status = StepStatus::InProgress;
        self.started_at = Some(now_ms);
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETED, recording the output
    pub fn complete(&mut self, output: impl Into<String>, now_ms: i64) -> Result<(), TransitionError> {
        debug!(step_id = self.step_id, "complete: called");
        self.check_transition(StepStatus::InProgress, StepStatus::Completed)?;
        self.status = StepStatus::Completed;
        self.output = Some(output.into());
        self.error = None;
        self.completed_at = Some(self.finish_time(now_ms));
        Ok(())
    }

    /// IN_PROGRESS -> FAILED, recording the error summary
    pub fn fail(&mut self, error: impl Into<String>, now_ms: i64) -> Result<(), TransitionError> {
        debug!(step_id = self.step_id, "fail: called");
        self.check_transition(StepStatus::InProgress, StepStatus::Failed)?;
        self.status = StepStatus::Failed;
        self.output = None;
        self.error = Some(error.into());
        self.completed_at = Some(self.finish_time(now_ms));
        Ok(())
    }

    /// Wall clocks can step backwards; never finish before we started
    fn finish_time(&self, now_ms: i64) -> i64 {
        self.started_at.map_or(now_ms, |started| now_ms.max(started))
    }

    fn check_transition(&self, expected: StepStatus, to: StepStatus) -> Result<(), TransitionError> {
        if self.status != expected {
            debug!(step_id = self.step_id, from = %self.status, %to, "check_transition: rejected");
            return Err(TransitionError {
                step_id: self.step_id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}
