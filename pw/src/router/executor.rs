//! Step executor
//!
//! Runs one step: render its prompt, call the LLM with bounded retries and
//! exponential backoff, and record the outcome on the step.
//!
//! Execution is split into three phases so the plan is never borrowed while
//! an LLM call is in flight:
//! - `prepare` renders the prompt and moves the step to IN_PROGRESS
//! - `run_attempts` talks to the LLM (no plan access)
//! - `apply` writes the result back to the step

use std::collections::BTreeMap;
use std::sync::Arc;

use planstore::now_ms;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::{RetryPolicy, RouterConfig};
use crate::domain::{ExecutionStep, Plan, StepId, StepStatus, TransitionError};
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::prompts::PromptRenderer;

/// A step could not be executed at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("Step {0} not found in plan")]
    UnknownStep(StepId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Result of one `execute_step`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed { step_id: StepId, model: String, output: String },
    Failed { step_id: StepId, model: String, error: String },
}

impl StepOutcome {
    pub fn step_id(&self) -> StepId {
        match self {
            Self::Completed { step_id, .. } | Self::Failed { step_id, .. } => *step_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A step that is IN_PROGRESS and ready for its LLM call
#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub step_id: StepId,
    pub model: String,
    pub request: CompletionRequest,
}

/// Output of the preparation phase
#[derive(Debug)]
pub enum Prepared {
    /// Prompt rendered, step IN_PROGRESS
    Ready(PreparedStep),
    /// Prompt rendering failed; the step is already FAILED
    Finished(StepOutcome),
}

/// Executes single steps against an LLM
pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    renderer: Arc<dyn PromptRenderer>,
    retry: RetryPolicy,
    max_tokens: u32,
    default_model: String,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, renderer: Arc<dyn PromptRenderer>, retry: RetryPolicy, max_tokens: u32) -> Self {
        Self {
            llm,
            renderer,
            retry,
            max_tokens,
            default_model: RouterConfig::default().default_model,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run a single PENDING step to COMPLETED or FAILED
    ///
    /// Only the step itself is mutated. Errors mean the step was not PENDING
    /// or does not exist; LLM failures are reported as `StepOutcome::Failed`.
    pub async fn execute_step(
        &self,
        plan: &mut Plan,
        step_id: StepId,
        context: &Map<String, Value>,
        model_override: Option<&str>,
    ) -> Result<StepOutcome, StepError> {
        match self.prepare(plan, step_id, context, model_override)? {
            Prepared::Finished(outcome) => Ok(outcome),
            Prepared::Ready(prepared) => {
                let outcome = self.run_attempts(prepared).await;
                self.apply(plan, &outcome)?;
                Ok(outcome)
            }
        }
    }

    /// Render the prompt and move the step to IN_PROGRESS
    pub fn prepare(
        &self,
        plan: &mut Plan,
        step_id: StepId,
        context: &Map<String, Value>,
        model_override: Option<&str>,
    ) -> Result<Prepared, StepError> {
        debug!(session_id = %plan.session_id, step_id, "prepare: called");
        let step = plan.step(step_id).ok_or(StepError::UnknownStep(step_id))?;
        if step.status != StepStatus::Pending {
            return Err(StepError::Transition(TransitionError {
                step_id,
                from: step.status,
                to: StepStatus::InProgress,
            }));
        }

        let model = resolve_model(step, model_override, &self.default_model);
        let prompt_context = build_prompt_context(plan, step, context);
        let scenario = plan.scenario_name.clone().unwrap_or_default();
        let rendered = self.renderer.render_executor_prompt(&scenario, &step.task, &prompt_context);

        let step = plan.step_mut(step_id).ok_or(StepError::UnknownStep(step_id))?;
        step.start(now_ms())?;

        match rendered {
            Ok(prompt) => Ok(Prepared::Ready(PreparedStep {
                step_id,
                request: CompletionRequest::prompt(model.clone(), prompt, self.max_tokens),
                model,
            })),
            Err(e) => {
                warn!(step_id, error = %e, "prepare: prompt rendering failed");
                let error = format!("Failed after 0 attempts: prompt rendering failed: {}", e);
                step.fail(error.clone(), now_ms())?;
                Ok(Prepared::Finished(StepOutcome::Failed { step_id, model, error }))
            }
        }
    }

    /// Call the LLM up to `max_attempts` times
    ///
    /// Any error or empty content counts as a failed attempt. Between attempts
    /// the task sleeps for the backoff delay; there is no sleep after the last.
    pub async fn run_attempts(&self, prepared: PreparedStep) -> StepOutcome {
        let PreparedStep {
            step_id,
            model,
            request,
        } = prepared;
        debug!(step_id, %model, "run_attempts: called");

        let mut last_error = String::from("No attempts made");
        for attempt in 1..=self.retry.max_attempts {
            match self.llm.complete(request.clone()).await {
                Ok(response) => match response.non_empty_content() {
                    Some(content) => {
                        info!(step_id, attempt, %model, "Step completed");
                        return StepOutcome::Completed {
                            step_id,
                            model,
                            output: content.to_string(),
                        };
                    }
                    None => {
                        warn!(step_id, attempt, "Step attempt returned empty response");
                        last_error = LlmError::EmptyResponse.to_string();
                    }
                },
                Err(e) => {
                    warn!(step_id, attempt, retryable = e.is_retryable(), error = %e, "Step attempt failed");
                    last_error = e.to_string();
                }
            }

            if let Some(delay) = self.retry.delay_after(attempt) {
                debug!(step_id, attempt, delay_ms = delay.as_millis() as u64, "run_attempts: backing off");
                tokio::time::sleep(delay).await;
            }
        }

        let error = format!("Failed after {} attempts: {}", self.retry.max_attempts, last_error);
        warn!(step_id, %error, "Step failed");
        StepOutcome::Failed { step_id, model, error }
    }

    /// Record an outcome on its (IN_PROGRESS) step
    pub fn apply(&self, plan: &mut Plan, outcome: &StepOutcome) -> Result<(), StepError> {
        let step_id = outcome.step_id();
        let step = plan.step_mut(step_id).ok_or(StepError::UnknownStep(step_id))?;
        match outcome {
            StepOutcome::Completed { output, .. } => step.complete(output.clone(), now_ms())?,
            StepOutcome::Failed { error, .. } => step.fail(error.clone(), now_ms())?,
        }
        Ok(())
    }
}

/// Explicit override, else the step's `assigned_model`, else `default_model`
pub fn resolve_model(step: &ExecutionStep, model_override: Option<&str>, default_model: &str) -> String {
    model_override
        .filter(|m| !m.is_empty())
        .or(Some(step.assigned_model.as_str()).filter(|m| !m.is_empty()))
        .unwrap_or(default_model)
        .to_string()
}

/// Outputs of this step's direct dependencies that are COMPLETED, keyed by id
pub fn previous_outputs(plan: &Plan, step: &ExecutionStep) -> BTreeMap<StepId, String> {
    plan.execution_graph
        .iter()
        .filter(|s| s.status == StepStatus::Completed && step.dependencies.contains(&s.step_id))
        .filter_map(|s| s.output.clone().map(|o| (s.step_id, o)))
        .collect()
}

/// Template data: caller context (flattened and under `context`), plus the
/// plan's locked constraints and the previous outputs
fn build_prompt_context(plan: &Plan, step: &ExecutionStep, context: &Map<String, Value>) -> Value {
    let mut data = context.clone();
    data.insert("context".to_string(), Value::Object(context.clone()));
    data.insert(
        "locked_constraints".to_string(),
        Value::Object(plan.locked_constraints.clone().into_iter().collect()),
    );
    let outputs: Map<String, Value> = previous_outputs(plan, step)
        .into_iter()
        .map(|(id, output)| (id.to_string(), Value::String(output)))
        .collect();
    data.insert("previous_outputs".to_string(), Value::Object(outputs));
    Value::Object(data)
}
