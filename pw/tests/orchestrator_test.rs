//! Integration tests for the session lifecycle
//!
//! Orchestrator + StateManager on a temporary store, with a scripted LLM.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tempfile::TempDir;

use planweaver::config::Config;
use planweaver::domain::{ContextSource, ExecutionStep, Plan, PlanStatus, StepStatus};
use planweaver::llm::{ScriptedLlmClient, ScriptedReply};
use planweaver::orchestrator::{Orchestrator, OrchestratorError, SessionOptions};
use planweaver::prompts::TemplateEngine;
use planweaver::router::GraphError;
use planweaver::state::{PlanQuery, StateManager};

const ANALYSIS: &str = r#"{
    "identified_constraints": ["Rust"],
    "missing_information": ["Which database should be used?"],
    "suggested_approach": "Small HTTP service",
    "estimated_complexity": "medium"
}"#;

const PROPOSALS: &str = r#"[
    {"title": "Axum service", "description": "Async HTTP with axum", "pros": ["fast"], "cons": ["boilerplate"]},
    {"title": "CLI first", "description": "Start as a CLI", "pros": ["simple"], "cons": ["no API"]}
]"#;

const STEPS: &str = r#"```json
[
    {"step_id": 1, "task": "Scaffold the service", "assigned_model": "gpt-4o", "dependencies": []},
    {"step_id": 2, "task": "Write the handlers", "dependencies": [1]}
]
```"#;

fn scripted() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .on("Analyze the following user request", [ScriptedReply::text(ANALYSIS)])
        .on("strawman solutions", [ScriptedReply::text(PROPOSALS)])
        .on("dependency graph of steps", [ScriptedReply::text(STEPS)])
        .on("Task: Scaffold the service", [ScriptedReply::text("scaffolded")])
        .on("Task: Write the handlers", [ScriptedReply::text("handlers written")])
}

struct Harness {
    _temp: TempDir,
    state: StateManager,
    llm: Arc<ScriptedLlmClient>,
    orchestrator: Orchestrator,
}

fn harness(llm: ScriptedLlmClient) -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let state = StateManager::spawn(temp.path()).expect("Failed to spawn state manager");
    let llm = Arc::new(llm);
    let renderer = Arc::new(TemplateEngine::embedded_only().expect("embedded templates"));

    let mut config = Config::default();
    config.models.planner = "planner-m".to_string();
    config.models.executor = "executor-m".to_string();
    config.execution.backoff_base_ms = 1;

    let orchestrator = Orchestrator::new(llm.clone(), renderer, Arc::new(state.clone()), &config);
    Harness {
        _temp: temp,
        state,
        llm,
        orchestrator,
    }
}

// =============================================================================
// Full lifecycle
// =============================================================================

#[tokio::test]
async fn test_full_session_lifecycle() {
    let h = harness(scripted());
    let orch = &h.orchestrator;

    let plan = orch
        .start_session("Build a todo API in Rust", SessionOptions::default())
        .await
        .unwrap();
    assert_eq!(plan.status, PlanStatus::Brainstorming);
    assert!(plan.planner_model.is_none());
    assert!(plan.executor_model.is_none());
    assert_eq!(
        plan.locked_constraints.get("Rust"),
        Some(&Value::from("extracted from request"))
    );
    assert_eq!(plan.open_questions.len(), 1);
    let id = plan.session_id.clone();

    let proposals = orch.generate_proposals(&id).await.unwrap();
    assert_eq!(proposals.len(), 2);

    let plan = orch.select_proposal(&id, &proposals[0].id).await.unwrap();
    assert!(plan.strawman_proposals[0].selected);
    assert!(!plan.strawman_proposals[1].selected);
    assert_eq!(
        plan.locked_constraints.get("selected_approach"),
        Some(&Value::from("Axum service"))
    );
    assert_eq!(
        plan.locked_constraints.get("approach_description"),
        Some(&Value::from("Async HTTP with axum"))
    );

    let question_id = plan.open_questions[0].id.clone();
    let answers = BTreeMap::from([(question_id.clone(), "SQLite".to_string())]);
    let plan = orch.answer_questions(&id, &answers).await.unwrap();
    assert_eq!(plan.status, PlanStatus::AwaitingApproval);
    assert_eq!(plan.execution_graph.len(), 2);
    assert_eq!(plan.execution_graph[0].assigned_model, "gpt-4o");
    assert_eq!(plan.execution_graph[1].assigned_model, "planner-m");
    assert_eq!(plan.locked_constraints.get(&question_id), Some(&Value::from("SQLite")));

    // Not approved yet
    let err = orch.execute(&id, &Map::new(), None).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidStatus {
            expected: PlanStatus::Approved,
            actual: PlanStatus::AwaitingApproval,
            ..
        }
    ));

    orch.approve_plan(&id).await.unwrap();
    let next = orch.next_executable_step(&id).await.unwrap().unwrap();
    assert_eq!(next.step_id, 1);

    let result = orch.execute(&id, &Map::new(), None).await.unwrap();
    assert_eq!(result.plan.status, PlanStatus::Completed);
    let output = result.plan.final_output.clone().unwrap();
    assert_eq!(output["step_1"], "scaffolded");
    assert_eq!(output["step_2"], "handlers written");

    // Each step ran on its own model, with constraints in the prompt
    let step_calls: Vec<_> = h
        .llm
        .calls()
        .into_iter()
        .filter(|r| r.text().starts_with("Task: "))
        .collect();
    assert_eq!(step_calls.len(), 2);
    assert_eq!(step_calls[0].model, "gpt-4o");
    assert_eq!(step_calls[1].model, "planner-m");
    assert!(step_calls[0].text().contains("selected_approach: Axum service"));

    // Saved exactly as returned
    let stored = h.state.get_plan(&id).await.unwrap().unwrap();
    assert_eq!(stored, result.plan);

    let page = orch
        .list_sessions(PlanQuery {
            status: Some(PlanStatus::Completed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.sessions[0].session_id, id);

    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_executor_model_overrides_step_models() {
    let h = harness(scripted());
    let options = SessionOptions {
        executor_model: Some("session-exec".to_string()),
        ..SessionOptions::default()
    };
    let plan = h.orchestrator.start_session("Build a todo API in Rust", options).await.unwrap();
    assert_eq!(plan.executor_model.as_deref(), Some("session-exec"));
    let id = plan.session_id.clone();

    let answers = BTreeMap::from([(plan.open_questions[0].id.clone(), "SQLite".to_string())]);
    h.orchestrator.answer_questions(&id, &answers).await.unwrap();
    h.orchestrator.approve_plan(&id).await.unwrap();
    h.orchestrator.execute(&id, &Map::new(), None).await.unwrap();

    let models: Vec<String> = h
        .llm
        .calls()
        .into_iter()
        .filter(|r| r.text().starts_with("Task: "))
        .map(|r| r.model)
        .collect();
    assert_eq!(models, vec!["session-exec".to_string(), "session-exec".to_string()]);
}

#[tokio::test]
async fn test_execute_override_beats_session_model() {
    let h = harness(scripted());
    let mut plan = Plan::new("stored directly", None);
    plan.executor_model = Some("session-exec".to_string());
    plan.execution_graph = vec![ExecutionStep::new(1, "Scaffold the service", "gpt-4o")];
    plan.status = PlanStatus::Approved;
    h.state.save_plan(plan.clone()).await.unwrap();

    h.orchestrator
        .execute(&plan.session_id, &Map::new(), Some("call-override"))
        .await
        .unwrap();
    assert_eq!(h.llm.calls()[0].model, "call-override");
}

#[tokio::test]
async fn test_no_questions_decomposes_on_empty_answer() {
    let llm = ScriptedLlmClient::new()
        .on(
            "Analyze the following user request",
            [ScriptedReply::text(r#"{"identified_constraints": [], "missing_information": []}"#)],
        )
        .on("dependency graph of steps", [ScriptedReply::text("no idea")]);
    let h = harness(llm);

    let plan = h
        .orchestrator
        .start_session("Summarize a paper", SessionOptions::default())
        .await
        .unwrap();
    assert!(plan.open_questions.is_empty());

    let plan = h
        .orchestrator
        .answer_questions(&plan.session_id, &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(plan.status, PlanStatus::AwaitingApproval);
    assert_eq!(plan.execution_graph.len(), 1);
    assert_eq!(plan.execution_graph[0].task, "Execute user request directly");
    assert_eq!(plan.execution_graph[0].assigned_model, "planner-m");
}

// =============================================================================
// Guards
// =============================================================================

async fn store_plan(h: &Harness, status: PlanStatus, steps: Vec<ExecutionStep>) -> Plan {
    let mut plan = Plan::new("stored directly", None);
    plan.execution_graph = steps;
    plan.status = status;
    h.state.save_plan(plan.clone()).await.unwrap();
    plan
}

#[tokio::test]
async fn test_approve_rejects_cyclic_graph() {
    let h = harness(scripted());
    let plan = store_plan(
        &h,
        PlanStatus::AwaitingApproval,
        vec![
            ExecutionStep::new(1, "a", "m").with_dependencies([2]),
            ExecutionStep::new(2, "b", "m").with_dependencies([1]),
        ],
    )
    .await;

    let err = h.orchestrator.approve_plan(&plan.session_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Graph(GraphError::Cycle { .. })));

    let stored = h.state.get_plan(&plan.session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PlanStatus::AwaitingApproval);
}

#[tokio::test]
async fn test_concurrent_execute_of_same_session_rejected() {
    let llm = ScriptedLlmClient::new()
        .otherwise(ScriptedReply::text("slow result"))
        .with_latency(Duration::from_millis(200));
    let h = harness(llm);
    let plan = store_plan(&h, PlanStatus::Approved, vec![ExecutionStep::new(1, "slow", "m")]).await;

    let ctx = Map::new();
    let (first, second) = tokio::join!(
        h.orchestrator.execute(&plan.session_id, &ctx, None),
        h.orchestrator.execute(&plan.session_id, &ctx, None),
    );

    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::AlreadyExecuting(_))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(rejected, 1);
    assert_eq!(h.llm.call_count(), 1);
}

#[tokio::test]
async fn test_session_resolved_by_prefix() {
    let h = harness(scripted());
    let plan = store_plan(&h, PlanStatus::Brainstorming, vec![]).await;
    let short = &plan.session_id["proj_".len().."proj_".len() + 28];

    let found = h.orchestrator.get_session(short).await.unwrap();
    assert_eq!(found.session_id, plan.session_id);

    let missing = h.orchestrator.get_session("proj_doesnotexist").await.unwrap_err();
    assert!(matches!(missing, OrchestratorError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_add_external_context_feeds_planner_state() {
    let h = harness(scripted());
    let plan = store_plan(&h, PlanStatus::Brainstorming, vec![]).await;

    let updated = h
        .orchestrator
        .add_external_context(
            &plan.session_id,
            ContextSource::WebSearch,
            Some("https://example.com/rfc".to_string()),
            "RFC summary",
        )
        .await
        .unwrap();
    assert_eq!(updated.external_contexts.len(), 1);
    assert_eq!(updated.external_contexts[0].source_type, ContextSource::WebSearch);

    let completed = store_plan(&h, PlanStatus::Completed, vec![]).await;
    let err = h
        .orchestrator
        .add_external_context(&completed.session_id, ContextSource::Github, None, "late")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidStatus { .. }));
}

#[tokio::test]
async fn test_recover_stuck_marks_plan_failed() {
    let h = harness(scripted());
    let mut step = ExecutionStep::new(1, "interrupted", "m");
    step.start(planstore::now_ms() - 2 * 3_600_000).unwrap();
    let plan = store_plan(
        &h,
        PlanStatus::Executing,
        vec![step, ExecutionStep::new(2, "waiting", "m").with_dependencies([1])],
    )
    .await;

    let (recovered_plan, recovered) = h.orchestrator.recover_stuck(&plan.session_id).await.unwrap();
    assert_eq!(recovered, vec![1]);
    assert_eq!(recovered_plan.status, PlanStatus::Failed);

    let stored = h.state.get_plan(&plan.session_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PlanStatus::Failed);
    assert_eq!(stored.step(1).unwrap().status, StepStatus::Failed);
    assert!(
        stored
            .step(1)
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .starts_with("Interrupted while in progress")
    );
    assert_eq!(stored.step(2).unwrap().status, StepStatus::Pending);
    assert_eq!(h.llm.call_count(), 0);
}
