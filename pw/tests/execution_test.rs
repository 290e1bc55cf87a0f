//! End-to-end tests for the plan execution loop
//!
//! These drive `ExecutionRouter` through the public API with a scripted LLM.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use planweaver::domain::{ExecutionStep, Plan, PlanStatus, StepStatus};
use planweaver::llm::{ScriptedLlmClient, ScriptedReply};
use planweaver::prompts::TemplateEngine;
use planweaver::router::{ExecutionError, ExecutionRouter, GraphError, RouterConfig};

fn router(llm: Arc<ScriptedLlmClient>, config: RouterConfig) -> ExecutionRouter {
    let renderer = Arc::new(TemplateEngine::embedded_only().expect("embedded templates"));
    ExecutionRouter::new(llm, renderer, config)
}

fn approved_plan(steps: Vec<ExecutionStep>) -> Plan {
    let mut plan = Plan::new("integration intent", None);
    for step in steps {
        plan.add_step(step);
    }
    plan.status = PlanStatus::Approved;
    plan
}

fn step(id: u32, task: &str, deps: &[u32]) -> ExecutionStep {
    ExecutionStep::new(id, task, "exec-model").with_dependencies(deps.iter().copied())
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_two_step_chain_completes() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("Task: alpha", [ScriptedReply::text("x")])
            .on("Task: beta", [ScriptedReply::text("y")]),
    );
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[]), step(2, "beta", &[1])]);

    let report = router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(report.status, PlanStatus::Completed);
    assert_eq!(plan.status, PlanStatus::Completed);
    let expected = BTreeMap::from([
        ("step_1".to_string(), "x".to_string()),
        ("step_2".to_string(), "y".to_string()),
    ]);
    assert_eq!(plan.final_output, Some(expected));

    // Step 2 saw step 1's output
    let beta_prompt = llm
        .calls()
        .into_iter()
        .map(|r| r.text())
        .find(|t| t.contains("Task: beta"))
        .unwrap();
    assert!(beta_prompt.contains("--- Step 1 ---"));
    assert!(beta_prompt.contains('x'));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_mutation() {
    let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::text("never")));
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[2]), step(2, "beta", &[1])]);
    let before = plan.clone();

    let err = router.execute(&mut plan, &Map::new(), None).await.unwrap_err();

    assert!(matches!(err, ExecutionError::Graph(GraphError::Cycle { .. })));
    assert_eq!(plan, before);
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_aggregates_every_completed_output() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("Task: first", [ScriptedReply::text("a")])
            .on("Task: second", [ScriptedReply::text("b")])
            .on("Task: third", [ScriptedReply::text("c")]),
    );
    let router = router(llm, RouterConfig::default());
    let mut plan = approved_plan(vec![
        step(1, "first", &[]),
        step(2, "second", &[]),
        step(3, "third", &[1, 2]),
    ]);

    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    let output = plan.final_output.unwrap();
    assert_eq!(output.len(), 3);
    assert_eq!(output["step_1"], "a");
    assert_eq!(output["step_2"], "b");
    assert_eq!(output["step_3"], "c");
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_root_leaves_dependent_pending() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("Task: alpha", [ScriptedReply::error("provider down")])
            .on("Task: beta", [ScriptedReply::text("unreachable")]),
    );
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[]), step(2, "beta", &[1])]);

    let report = router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Failed);
    assert!(plan.final_output.is_none());
    assert_eq!(plan.step(2).unwrap().status, StepStatus::Pending);
    assert!(plan.step(2).unwrap().started_at.is_none());
    assert_eq!(llm.calls_matching("Task: beta"), 0);
    assert_eq!(report.failed_steps.len(), 1);
    assert_eq!(report.failed_steps[0].0, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_and_backoff() {
    let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::error("always fails")));
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[])]);

    let start = tokio::time::Instant::now();
    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(llm.call_count(), 3);
    // 1s after the first failure, 2s after the second, none after the last
    assert_eq!(start.elapsed(), Duration::from_secs(3));

    let failed = plan.step(1).unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert!(failed.error.as_deref().unwrap().starts_with("Failed after 3 attempts"));
    assert!(failed.output.is_none());
    assert!(failed.completed_at.unwrap() >= failed.started_at.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_empty_response_is_retried() {
    let llm = Arc::new(ScriptedLlmClient::new().on(
        "Task: alpha",
        [ScriptedReply::Empty, ScriptedReply::text("")],
    ));
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[])]);

    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(llm.call_count(), 3);
    assert_eq!(plan.status, PlanStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_of_failed_plan_is_rejected() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("Task: alpha", [ScriptedReply::error("nope")])
            .on("Task: beta", [ScriptedReply::text("independent")]),
    );
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "alpha", &[]), step(2, "beta", &[])]);

    router.execute(&mut plan, &Map::new(), None).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.step(2).unwrap().status, StepStatus::Pending);
    let after_first_run = plan.clone();
    let calls_after_first_run = llm.call_count();

    let err = router.execute(&mut plan, &Map::new(), None).await.unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::NotApproved {
            status: PlanStatus::Failed,
            ..
        }
    ));
    assert_eq!(plan, after_first_run);
    assert_eq!(llm.call_count(), calls_after_first_run);
    assert_eq!(llm.calls_matching("Task: beta"), 0);
}

#[tokio::test]
async fn test_step_budget_fails_plan_with_pending_work() {
    let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::text("ok")));
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "a", &[]), step(2, "b", &[1]), step(3, "c", &[2])]);

    let report = router.execute_plan(&mut plan, &Map::new(), None, 2).await.unwrap();

    assert!(report.budget_exhausted);
    assert_eq!(report.steps_executed, 2);
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.step(3).unwrap().status, StepStatus::Pending);
    assert_eq!(llm.call_count(), 2);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ready_batch_runs_concurrently() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .otherwise(ScriptedReply::text("ok"))
            .with_latency(Duration::from_millis(100)),
    );
    let config = RouterConfig {
        max_concurrent_steps: 3,
        ..RouterConfig::default()
    };
    let router = router(llm.clone(), config);
    let mut plan = approved_plan(vec![
        step(1, "a", &[]),
        step(2, "b", &[]),
        step(3, "c", &[]),
        step(4, "d", &[1, 2, 3]),
    ]);

    let start = tokio::time::Instant::now();
    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(llm.max_concurrency(), 3);
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failure_keeps_sibling_results() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on("Task: good", [ScriptedReply::text("kept")])
            .on("Task: bad", [ScriptedReply::error("broken")])
            .otherwise(ScriptedReply::text("later")),
    );
    let config = RouterConfig {
        max_concurrent_steps: 2,
        ..RouterConfig::default()
    };
    let router = router(llm.clone(), config);
    let mut plan = approved_plan(vec![
        step(1, "good", &[]),
        step(2, "bad", &[]),
        step(3, "after", &[1]),
    ]);

    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.step(1).unwrap().status, StepStatus::Completed);
    assert_eq!(plan.step(1).unwrap().output.as_deref(), Some("kept"));
    assert_eq!(plan.step(2).unwrap().status, StepStatus::Failed);
    assert_eq!(plan.step(3).unwrap().status, StepStatus::Pending);
    assert_eq!(llm.calls_matching("Task: after"), 0);
}

#[tokio::test]
async fn test_model_override_wins() {
    let llm = Arc::new(ScriptedLlmClient::new().otherwise(ScriptedReply::text("ok")));
    let router = router(llm.clone(), RouterConfig::default());
    let mut plan = approved_plan(vec![step(1, "a", &[])]);
    plan.executor_model = Some("session-model".to_string());

    router.execute(&mut plan, &Map::new(), Some("override-model")).await.unwrap();
    assert_eq!(llm.calls()[0].model, "override-model");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_does_not_block_sibling() {
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(
                "Task: flaky",
                [
                    ScriptedReply::error("blip"),
                    ScriptedReply::error("blip"),
                    ScriptedReply::text("finally"),
                ],
            )
            .on("Task: steady", [ScriptedReply::text("right away")]),
    );
    let config = RouterConfig {
        max_concurrent_steps: 2,
        ..RouterConfig::default()
    };
    let router = router(llm.clone(), config);
    let mut plan = approved_plan(vec![step(1, "flaky", &[]), step(2, "steady", &[])]);

    let start = tokio::time::Instant::now();
    router.execute(&mut plan, &Map::new(), None).await.unwrap();

    assert_eq!(plan.status, PlanStatus::Completed);
    // Backoff of 1s then 2s for the flaky step only
    assert_eq!(start.elapsed(), Duration::from_secs(3));

    let offsets: Vec<(bool, Duration)> = llm
        .call_log()
        .into_iter()
        .map(|(request, at)| (request.text().contains("Task: steady"), at.duration_since(start)))
        .collect();
    let steady: Vec<Duration> = offsets.iter().filter(|(s, _)| *s).map(|(_, at)| *at).collect();
    let flaky: Vec<Duration> = offsets.iter().filter(|(s, _)| !*s).map(|(_, at)| *at).collect();
    assert_eq!(steady, vec![Duration::ZERO]);
    assert_eq!(
        flaky,
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)]
    );

    let flaky_step = plan.step(1).unwrap();
    let steady_step = plan.step(2).unwrap();
    assert_eq!(steady_step.output.as_deref(), Some("right away"));
    assert!(steady_step.completed_at.unwrap() <= flaky_step.completed_at.unwrap());
}
