//! Session orchestration
//!
//! Composition root for one planning session lifecycle: start, clarify,
//! propose, approve, execute. Every operation loads the plan once, mutates
//! it in memory and saves it once.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use planstore::now_ms;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, ModelsConfig};
use crate::domain::{
    ContextSource, ExecutionStep, ExternalContext, Plan, PlanStatus, SESSION_PREFIX, StatusError, StepId,
    StrawmanProposal, resolve_session_id,
};
use crate::llm::LlmClient;
use crate::planning::{Planner, PlannerError};
use crate::prompts::PromptRenderer;
use crate::router::{
    ExecutionError, ExecutionReport, ExecutionRouter, GraphError, RouterConfig, get_executable_steps,
    recover_stuck_steps, validate_graph,
};
use crate::state::{PlanPage, PlanQuery, PlanRepository, StateError};

/// Orchestration failures
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session id '{0}' is ambiguous")]
    AmbiguousSession(String),

    #[error("Session {session_id} is {actual}; {operation} requires {expected}")]
    InvalidStatus {
        session_id: String,
        operation: &'static str,
        expected: PlanStatus,
        actual: PlanStatus,
    },

    #[error("Session {0} is already executing")]
    AlreadyExecuting(String),

    #[error("Proposal {proposal_id} not found in session {session_id}")]
    ProposalNotFound { session_id: String, proposal_id: String },

    #[error("Invalid execution graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Options for `start_session`
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub scenario_name: Option<String>,
    pub planner_model: Option<String>,
    pub executor_model: Option<String>,
    pub external_contexts: Vec<ExternalContext>,
}

/// Result of `execute`
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub plan: Plan,
    pub report: ExecutionReport,
}

/// Drives sessions through planning and execution
pub struct Orchestrator {
    repo: Arc<dyn PlanRepository>,
    planner: Planner,
    router: ExecutionRouter,
    models: ModelsConfig,
    stuck_after: Duration,
    executing: Mutex<HashSet<String>>,
}

/// Removes a session from the executing set when dropped
struct ExecutionGuard<'a> {
    executing: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut running) = self.executing.lock() {
            running.remove(&self.session_id);
        }
    }
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        renderer: Arc<dyn PromptRenderer>,
        repo: Arc<dyn PlanRepository>,
        config: &Config,
    ) -> Self {
        debug!("Orchestrator::new: called");
        Self {
            repo,
            planner: Planner::new(llm.clone(), renderer.clone(), config.llm.max_tokens),
            router: ExecutionRouter::new(
                llm,
                renderer,
                RouterConfig::from(&config.execution).with_default_model(&config.models.executor),
            ),
            models: config.models.clone(),
            stuck_after: Duration::from_secs(config.execution.stuck_after_secs),
            executing: Mutex::new(HashSet::new()),
        }
    }

    fn planner_model(&self, plan: &Plan) -> String {
        plan.planner_model.clone().unwrap_or_else(|| self.models.planner.clone())
    }

    /// Full session id for an exact id or a unique prefix
    pub async fn resolve_id(&self, input: &str) -> Result<String, OrchestratorError> {
        if self.repo.get(input).await?.is_some() {
            return Ok(input.to_string());
        }
        let ids = self.repo.session_ids().await?;
        if let Some(id) = resolve_session_id(input, ids.iter().map(String::as_str)) {
            return Ok(id.to_string());
        }
        let bare = input.strip_prefix(SESSION_PREFIX).unwrap_or(input);
        let matches = ids
            .iter()
            .filter(|id| id.strip_prefix(SESSION_PREFIX).unwrap_or(id).starts_with(bare))
            .count();
        if !bare.is_empty() && matches > 1 {
            return Err(OrchestratorError::AmbiguousSession(input.to_string()));
        }
        Err(OrchestratorError::SessionNotFound(input.to_string()))
    }

    async fn load(&self, session_id: &str) -> Result<Plan, OrchestratorError> {
        let id = self.resolve_id(session_id).await?;
        self.repo
            .get(&id)
            .await?
            .ok_or(OrchestratorError::SessionNotFound(id))
    }

    fn require_status(plan: &Plan, operation: &'static str, expected: PlanStatus) -> Result<(), OrchestratorError> {
        if plan.status != expected {
            return Err(OrchestratorError::InvalidStatus {
                session_id: plan.session_id.clone(),
                operation,
                expected,
                actual: plan.status,
            });
        }
        Ok(())
    }

    /// Create a session, analyze the intent and save the plan
    pub async fn start_session(&self, user_intent: &str, options: SessionOptions) -> Result<Plan, OrchestratorError> {
        debug!(scenario = ?options.scenario_name, "start_session: called");
        let mut plan = Plan::new(user_intent, options.scenario_name);
        plan.planner_model = options.planner_model.filter(|m| !m.is_empty());
        plan.executor_model = options.executor_model.filter(|m| !m.is_empty());
        plan.external_contexts = options.external_contexts;
        let planner_model = self.planner_model(&plan);

        self.planner.seed_from_analysis(&mut plan, &planner_model).await?;
        self.repo.save(&plan).await?;
        info!(session_id = %plan.session_id, questions = plan.open_questions.len(), "Session started");
        Ok(plan)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Plan, OrchestratorError> {
        self.load(session_id).await
    }

    pub async fn list_sessions(&self, query: PlanQuery) -> Result<PlanPage, OrchestratorError> {
        Ok(self.repo.list(query).await?)
    }

    /// Attach external context to a session that has not started executing
    pub async fn add_external_context(
        &self,
        session_id: &str,
        source_type: ContextSource,
        source_url: Option<String>,
        content_summary: &str,
    ) -> Result<Plan, OrchestratorError> {
        let mut plan = self.load(session_id).await?;
        if matches!(
            plan.status,
            PlanStatus::Executing | PlanStatus::Completed | PlanStatus::Failed
        ) {
            return Err(OrchestratorError::InvalidStatus {
                session_id: plan.session_id,
                operation: "add_external_context",
                expected: PlanStatus::Brainstorming,
                actual: plan.status,
            });
        }
        plan.external_contexts
            .push(ExternalContext::new(source_type, source_url, content_summary));
        plan.touch();
        self.repo.save(&plan).await?;
        Ok(plan)
    }

    /// Generate strawman proposals and store them on the plan
    pub async fn generate_proposals(&self, session_id: &str) -> Result<Vec<StrawmanProposal>, OrchestratorError> {
        let mut plan = self.load(session_id).await?;
        Self::require_status(&plan, "generate_proposals", PlanStatus::Brainstorming)?;

        let model = self.planner_model(&plan);
        let proposals = self.planner.generate_proposals(&plan.user_intent, &model).await?;
        plan.strawman_proposals = proposals.clone();
        plan.touch();
        self.repo.save(&plan).await?;
        info!(session_id = %plan.session_id, count = proposals.len(), "Proposals generated");
        Ok(proposals)
    }

    /// Mark one proposal selected and lock its title and description
    pub async fn select_proposal(&self, session_id: &str, proposal_id: &str) -> Result<Plan, OrchestratorError> {
        let mut plan = self.load(session_id).await?;
        Self::require_status(&plan, "select_proposal", PlanStatus::Brainstorming)?;

        let Some(chosen) = plan.proposal(proposal_id).cloned() else {
            return Err(OrchestratorError::ProposalNotFound {
                session_id: plan.session_id,
                proposal_id: proposal_id.to_string(),
            });
        };
        for proposal in plan.strawman_proposals.iter_mut() {
            proposal.selected = proposal.id == chosen.id;
        }
        plan.lock_constraint("selected_approach", chosen.title);
        plan.lock_constraint("approach_description", chosen.description);
        self.repo.save(&plan).await?;
        Ok(plan)
    }

    /// Record answers; decomposes the plan once nothing is left open
    pub async fn answer_questions(
        &self,
        session_id: &str,
        answers: &BTreeMap<String, String>,
    ) -> Result<Plan, OrchestratorError> {
        let mut plan = self.load(session_id).await?;
        Self::require_status(&plan, "answer_questions", PlanStatus::Brainstorming)?;

        let model = self.planner_model(&plan);
        self.planner.refine_plan(&mut plan, answers, &model).await?;
        self.repo.save(&plan).await?;
        Ok(plan)
    }

    /// Approve a decomposed plan after checking its graph
    pub async fn approve_plan(&self, session_id: &str) -> Result<Plan, OrchestratorError> {
        let mut plan = self.load(session_id).await?;
        Self::require_status(&plan, "approve_plan", PlanStatus::AwaitingApproval)?;
        validate_graph(&plan.execution_graph)?;

        plan.advance_status(PlanStatus::Approved)?;
        self.repo.save(&plan).await?;
        info!(session_id = %plan.session_id, "Plan approved");
        Ok(plan)
    }

    /// Run an APPROVED plan to COMPLETED or FAILED
    ///
    /// The plan is loaded once and saved once. A second call for a session
    /// that is still running is rejected.
    pub async fn execute(
        &self,
        session_id: &str,
        context: &Map<String, Value>,
        model_override: Option<&str>,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let id = self.resolve_id(session_id).await?;
        let _guard = self.claim(&id)?;

        let mut plan = self.load(&id).await?;
        Self::require_status(&plan, "execute", PlanStatus::Approved)?;

        // A session-level executor model acts as a standing override
        let session_model = plan.executor_model.clone();
        let model_override = model_override.or(session_model.as_deref());
        let report = self.router.execute(&mut plan, context, model_override).await?;
        self.repo.save(&plan).await?;
        info!(session_id = %plan.session_id, status = %plan.status, steps = report.steps_executed, "Execution finished");
        Ok(ExecutionResult { plan, report })
    }

    fn claim(&self, session_id: &str) -> Result<ExecutionGuard<'_>, OrchestratorError> {
        let mut running = self.executing.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(session_id.to_string()) {
            warn!(%session_id, "Rejected concurrent execute");
            return Err(OrchestratorError::AlreadyExecuting(session_id.to_string()));
        }
        Ok(ExecutionGuard {
            executing: &self.executing,
            session_id: session_id.to_string(),
        })
    }

    /// First step the scheduler would run next, if any
    pub async fn next_executable_step(&self, session_id: &str) -> Result<Option<ExecutionStep>, OrchestratorError> {
        let plan = self.load(session_id).await?;
        Ok(get_executable_steps(&plan).first().map(|s| (*s).clone()))
    }

    /// Fail steps stuck IN_PROGRESS past the configured threshold
    pub async fn recover_stuck(&self, session_id: &str) -> Result<(Plan, Vec<StepId>), OrchestratorError> {
        let id = self.resolve_id(session_id).await?;
        let _guard = self.claim(&id)?;

        let mut plan = self.load(&id).await?;
        let recovered = recover_stuck_steps(&mut plan, now_ms(), self.stuck_after);
        if !recovered.is_empty() {
            self.repo.save(&plan).await?;
        }
        Ok((plan, recovered))
    }
}
