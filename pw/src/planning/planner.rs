//! Planner service
//!
//! Turns a user intent into planning artifacts: an intent analysis (locked
//! constraints and open questions), strawman proposals, and finally the
//! execution graph once every question is answered.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::parse::{Decoded, IntentAnalysis, parse_analysis, parse_decomposition, parse_proposals};
use crate::domain::{ExecutionStep, Plan, PlanStatus, StatusError, StrawmanProposal};
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::prompts::{PromptError, PromptRenderer};

/// Value recorded for constraints found in the original request
pub const EXTRACTED_CONSTRAINT: &str = "extracted from request";

/// Planning failures
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Drives the planning phase of a session
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    renderer: Arc<dyn PromptRenderer>,
    max_tokens: u32,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, renderer: Arc<dyn PromptRenderer>, max_tokens: u32) -> Self {
        Self {
            llm,
            renderer,
            max_tokens,
        }
    }

    /// Planner framing of the intent, including any external context
    pub fn planner_prompt(&self, plan: &Plan) -> Result<String, PromptError> {
        let contexts: Vec<Value> = plan
            .external_contexts
            .iter()
            .enumerate()
            .map(|(i, ctx)| {
                json!({
                    "index": i + 1,
                    "source_type": ctx.source_type.to_string().to_uppercase(),
                    "content_summary": ctx.content_summary,
                })
            })
            .collect();
        let context = json!({
            "external_contexts": contexts,
            "locked_constraints": plan.locked_constraints,
        });
        let scenario = plan.scenario_name.as_deref().unwrap_or_default();
        self.renderer.render_planner_prompt(scenario, &plan.user_intent, &context)
    }

    async fn complete_json(&self, model: &str, prompt: String) -> Result<Option<String>, PlannerError> {
        let request = CompletionRequest::prompt(model, prompt, self.max_tokens).json();
        let response = self.llm.complete(request).await?;
        Ok(response.content)
    }

    /// Ask the model for constraints and missing information
    ///
    /// Unparseable responses yield `IntentAnalysis::fallback()`.
    pub async fn analyze_intent(&self, plan: &Plan, model: &str) -> Result<IntentAnalysis, PlannerError> {
        debug!(session_id = %plan.session_id, %model, "analyze_intent: called");
        let planner_prompt = self.planner_prompt(plan)?;
        let prompt = self
            .renderer
            .render_template("analyze", &json!({ "planner_prompt": planner_prompt }))?;
        let raw = self.complete_json(model, prompt).await?;

        let decoded = parse_analysis(raw.as_deref());
        if let Decoded::Fallback { reason } = &decoded {
            warn!(session_id = %plan.session_id, %reason, "Intent analysis unusable, using fallback");
        }
        Ok(decoded.into_analysis())
    }

    /// New BRAINSTORMING plan seeded from an intent analysis
    ///
    /// Every identified constraint is locked as "extracted from request" and
    /// every missing piece of information becomes an open question.
    pub async fn create_initial_plan(
        &self,
        user_intent: &str,
        scenario_name: Option<String>,
        model: &str,
    ) -> Result<Plan, PlannerError> {
        let mut plan = Plan::new(user_intent, scenario_name);
        self.seed_from_analysis(&mut plan, model).await?;
        Ok(plan)
    }

    /// Run the intent analysis for an existing plan and record its findings
    pub async fn seed_from_analysis(&self, plan: &mut Plan, model: &str) -> Result<IntentAnalysis, PlannerError> {
        let analysis = self.analyze_intent(plan, model).await?;
        for constraint in &analysis.identified_constraints {
            plan.lock_constraint(constraint.clone(), EXTRACTED_CONSTRAINT);
        }
        for question in &analysis.missing_information {
            plan.add_open_question(question.clone());
        }
        info!(
            session_id = %plan.session_id,
            constraints = analysis.identified_constraints.len(),
            questions = analysis.missing_information.len(),
            "Plan seeded from intent analysis"
        );
        Ok(analysis)
    }

    /// Two or three alternative approaches for the intent
    ///
    /// An unparseable response yields no proposals.
    pub async fn generate_proposals(&self, user_intent: &str, model: &str) -> Result<Vec<StrawmanProposal>, PlannerError> {
        debug!(%model, "generate_proposals: called");
        let prompt = self
            .renderer
            .render_template("proposals", &json!({ "user_intent": user_intent }))?;
        let raw = self.complete_json(model, prompt).await?;

        match parse_proposals(raw.as_deref()) {
            Decoded::Parsed(proposals) => Ok(proposals),
            Decoded::Fallback { reason } => {
                warn!(%reason, "Proposals unusable, returning none");
                Ok(Vec::new())
            }
        }
    }

    /// Break the intent into an execution graph
    ///
    /// An unparseable response yields the single step "Execute user request
    /// directly" assigned to `model`.
    pub async fn decompose_into_steps(
        &self,
        user_intent: &str,
        locked_constraints: &BTreeMap<String, Value>,
        model: &str,
    ) -> Result<Vec<ExecutionStep>, PlannerError> {
        debug!(%model, "decompose_into_steps: called");
        let data = json!({
            "user_intent": user_intent,
            "locked_constraints": locked_constraints,
            "model": model,
        });
        let prompt = self.renderer.render_template("decompose", &data)?;
        let raw = self.complete_json(model, prompt).await?;

        let decomposition = parse_decomposition(raw.as_deref(), model);
        if let Decoded::Fallback { reason } = &decomposition {
            warn!(%reason, "Decomposition unusable, using single fallback step");
        }
        Ok(decomposition.into_steps(model))
    }

    /// Record answers and decompose once nothing is left open
    ///
    /// Answers are keyed by question id. Each answer is also locked as a
    /// constraint under that id. When no unanswered question remains and the
    /// plan is still BRAINSTORMING, the plan moves to AWAITING_APPROVAL and the
    /// decomposed steps are appended to the graph.
    pub async fn refine_plan(
        &self,
        plan: &mut Plan,
        answers: &BTreeMap<String, String>,
        model: &str,
    ) -> Result<(), PlannerError> {
        debug!(session_id = %plan.session_id, answer_count = answers.len(), "refine_plan: called");
        for question in plan.open_questions.iter_mut() {
            if let Some(answer) = answers.get(&question.id) {
                question.answer = Some(answer.clone());
                question.answered = true;
            }
        }
        for (question_id, answer) in answers {
            plan.lock_constraint(question_id.clone(), answer.clone());
        }

        if plan.has_unanswered_questions() || plan.status != PlanStatus::Brainstorming {
            plan.touch();
            return Ok(());
        }

        let steps = self
            .decompose_into_steps(&plan.user_intent, &plan.locked_constraints, model)
            .await?;
        plan.advance_status(PlanStatus::AwaitingApproval)?;
        for step in steps {
            plan.add_step(step);
        }
        info!(
            session_id = %plan.session_id,
            steps = plan.execution_graph.len(),
            "Plan decomposed, awaiting approval"
        );
        Ok(())
    }
}
