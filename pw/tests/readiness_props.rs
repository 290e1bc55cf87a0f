//! Property tests for graph validation and readiness over random graphs

use std::collections::BTreeSet;

use proptest::prelude::*;

use planweaver::domain::{ExecutionStep, Plan, StepStatus};
use planweaver::router::{GraphError, executable_step_ids, get_executable_steps, validate_graph};

fn status_strategy() -> impl Strategy<Value = StepStatus> {
    prop_oneof![
        4 => Just(StepStatus::Pending),
        3 => Just(StepStatus::Completed),
        1 => Just(StepStatus::Failed),
        1 => Just(StepStatus::Skipped),
        1 => Just(StepStatus::InProgress),
    ]
}

/// Steps 1..=n where each step may depend on any lower id
fn dag_strategy() -> impl Strategy<Value = Vec<ExecutionStep>> {
    (1usize..12).prop_flat_map(|n| {
        let per_step = (0..n)
            .map(|i| {
                (
                    proptest::collection::vec(any::<bool>(), i),
                    status_strategy(),
                )
            })
            .collect::<Vec<_>>();
        per_step.prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (edges, status))| {
                    let id = (i + 1) as u32;
                    let deps = edges
                        .iter()
                        .enumerate()
                        .filter(|(_, keep)| **keep)
                        .map(|(j, _)| (j + 1) as u32);
                    let mut step = ExecutionStep::new(id, format!("task {}", id), "m").with_dependencies(deps);
                    step.status = status;
                    step
                })
                .collect()
        })
    })
}

fn plan_from(steps: Vec<ExecutionStep>) -> Plan {
    let mut plan = Plan::new("property", None);
    plan.execution_graph = steps;
    plan
}

proptest! {
    #[test]
    fn readiness_matches_definition(steps in dag_strategy()) {
        prop_assert!(validate_graph(&steps).is_ok());
        let plan = plan_from(steps);

        let completed: BTreeSet<u32> = plan
            .execution_graph
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.step_id)
            .collect();
        let expected: Vec<u32> = plan
            .execution_graph
            .iter()
            .filter(|s| s.status == StepStatus::Pending && s.dependencies.is_subset(&completed))
            .map(|s| s.step_id)
            .collect();

        prop_assert_eq!(executable_step_ids(&plan), expected.clone());
        let again: Vec<u32> = get_executable_steps(&plan).iter().map(|s| s.step_id).collect();
        prop_assert_eq!(again, expected);
    }

    #[test]
    fn planted_back_edge_is_a_cycle(len in 2u32..10, back_from in 0u32..10) {
        // Chain 1 <- 2 <- ... <- len, then make some chain member a dependency of step 1
        let back_from = 2 + back_from % (len - 1);
        let mut steps: Vec<ExecutionStep> = (1..=len)
            .map(|id| {
                let deps: Vec<u32> = if id == 1 { vec![] } else { vec![id - 1] };
                ExecutionStep::new(id, "t", "m").with_dependencies(deps)
            })
            .collect();
        steps[0] = ExecutionStep::new(1, "t", "m").with_dependencies([back_from]);

        let is_cycle = matches!(validate_graph(&steps), Err(GraphError::Cycle { .. }));
        prop_assert!(is_cycle);
    }

    #[test]
    fn planted_missing_edge_is_reported(steps in dag_strategy(), pick in any::<prop::sample::Index>()) {
        let mut steps = steps;
        let n = steps.len() as u32;
        let idx = pick.index(steps.len());
        let step_id = steps[idx].step_id;
        steps[idx].dependencies.insert(n + 7);

        let err = validate_graph(&steps).unwrap_err();
        prop_assert_eq!(err, GraphError::MissingDependency { step_id, dependency: n + 7 });
    }
}
