//! Plan execution loop
//!
//! Drives the scheduler and the step executor until no step is ready, the
//! step budget runs out, or a step fails. One failed step fails the plan.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::RouterConfig;
use super::executor::{Prepared, StepError, StepExecutor, StepOutcome};
use super::scheduler::executable_step_ids;
use super::validation::{GraphError, validate_graph};
use crate::domain::{Plan, PlanStatus, StatusError, StepId, StepStatus};
use crate::llm::LlmClient;
use crate::prompts::PromptRenderer;

/// Execution could not start or the loop hit an internal inconsistency
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Plan {session_id} is {status}, only APPROVED plans can be executed")]
    NotApproved { session_id: String, status: PlanStatus },

    #[error("Invalid execution graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Step(#[from] StepError),
}

/// Summary of one `execute_plan` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Final plan status (COMPLETED or FAILED)
    pub status: PlanStatus,

    /// Step executions performed by this call
    pub steps_executed: usize,

    /// `(step_id, error)` for every FAILED step in the plan
    pub failed_steps: Vec<(StepId, String)>,

    /// The loop stopped because `max_steps` was reached
    pub budget_exhausted: bool,
}

/// Executes approved plans
pub struct ExecutionRouter {
    executor: StepExecutor,
    config: RouterConfig,
}

impl ExecutionRouter {
    pub fn new(llm: Arc<dyn LlmClient>, renderer: Arc<dyn PromptRenderer>, config: RouterConfig) -> Self {
        let executor = StepExecutor::new(llm, renderer, config.retry, config.step_max_tokens)
            .with_default_model(config.default_model.clone());
        Self { executor, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    /// Execute a plan with the configured step budget
    pub async fn execute(
        &self,
        plan: &mut Plan,
        context: &Map<String, Value>,
        model_override: Option<&str>,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.execute_plan(plan, context, model_override, self.config.max_steps)
            .await
    }

    /// Run the plan loop, mutating `plan` in place
    ///
    /// A plan that is not APPROVED, or has a malformed graph, is returned as an
    /// error before anything is touched. Otherwise the plan ends COMPLETED
    /// (with `final_output`) when every step is COMPLETED or SKIPPED, and
    /// FAILED in every other case.
    pub async fn execute_plan(
        &self,
        plan: &mut Plan,
        context: &Map<String, Value>,
        model_override: Option<&str>,
        max_steps: usize,
    ) -> Result<ExecutionReport, ExecutionError> {
        debug!(session_id = %plan.session_id, max_steps, "execute_plan: called");
        if plan.status != PlanStatus::Approved {
            return Err(ExecutionError::NotApproved {
                session_id: plan.session_id.clone(),
                status: plan.status,
            });
        }
        validate_graph(&plan.execution_graph)?;

        plan.advance_status(PlanStatus::Executing)?;
        plan.final_output = None;
        info!(session_id = %plan.session_id, steps = plan.execution_graph.len(), "Executing plan");

        let batch_size = self.config.max_concurrent_steps.max(1);
        let mut steps_executed = 0usize;
        let mut budget_exhausted = false;

        'outer: loop {
            let ready = executable_step_ids(plan);
            if ready.is_empty() {
                debug!("execute_plan: nothing ready");
                break;
            }
            debug!(?ready, "execute_plan: ready batch");

            for chunk in ready.chunks(batch_size) {
                let remaining = max_steps.saturating_sub(steps_executed);
                if remaining == 0 {
                    warn!(session_id = %plan.session_id, max_steps, "Step budget exhausted");
                    budget_exhausted = true;
                    break 'outer;
                }
                let chunk = &chunk[..chunk.len().min(remaining)];

                let outcomes = self.run_chunk(plan, chunk, context, model_override).await?;
                steps_executed += outcomes.len();

                if let Some(failed) = outcomes.iter().find(|o| !o.is_success()) {
                    warn!(session_id = %plan.session_id, step_id = failed.step_id(), "Step failed, aborting plan");
                    plan.advance_status(PlanStatus::Failed)?;
                    return Ok(self.report(plan, steps_executed, budget_exhausted));
                }
            }
        }

        if plan.all_steps_done() {
            plan.final_output = Some(aggregate_outputs(plan));
            plan.advance_status(PlanStatus::Completed)?;
            info!(session_id = %plan.session_id, steps_executed, "Plan completed");
        } else {
            plan.advance_status(PlanStatus::Failed)?;
            warn!(session_id = %plan.session_id, steps_executed, "Plan finished with unfinished steps");
        }

        Ok(self.report(plan, steps_executed, budget_exhausted))
    }

    /// Execute a group of ready steps
    ///
    /// Prompts are rendered and steps marked IN_PROGRESS up front. The LLM
    /// calls then run together without holding the plan, and each result is
    /// written back as soon as its step finishes, so a sibling in backoff never
    /// delays another step's outcome. Every started step is drained before
    /// returning.
    async fn run_chunk(
        &self,
        plan: &mut Plan,
        chunk: &[StepId],
        context: &Map<String, Value>,
        model_override: Option<&str>,
    ) -> Result<Vec<StepOutcome>, ExecutionError> {
        let mut finished = Vec::new();
        let mut pending = Vec::new();
        for &step_id in chunk {
            match self.executor.prepare(plan, step_id, context, model_override)? {
                Prepared::Ready(prepared) => pending.push(prepared),
                Prepared::Finished(outcome) => finished.push(outcome),
            }
        }

        let mut in_flight: FuturesUnordered<_> = pending
            .into_iter()
            .map(|p| self.executor.run_attempts(p))
            .collect();
        let mut outcomes = finished;
        while let Some(outcome) = in_flight.next().await {
            debug!(step_id = outcome.step_id(), success = outcome.is_success(), "run_chunk: step finished");
            self.executor.apply(plan, &outcome)?;
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| chunk.iter().position(|id| *id == o.step_id()));
        Ok(outcomes)
    }

    fn report(&self, plan: &Plan, steps_executed: usize, budget_exhausted: bool) -> ExecutionReport {
        ExecutionReport {
            status: plan.status,
            steps_executed,
            failed_steps: plan
                .failed_steps()
                .map(|s| (s.step_id, s.error.clone().unwrap_or_default()))
                .collect(),
            budget_exhausted,
        }
    }
}

/// `step_{id}` -> output for every COMPLETED step with output
pub fn aggregate_outputs(plan: &Plan) -> BTreeMap<String, String> {
    plan.execution_graph
        .iter()
        .filter(|s| s.status == StepStatus::Completed)
        .filter_map(|s| s.output.as_ref().map(|o| (format!("step_{}", s.step_id), o.clone())))
        .collect()
}
