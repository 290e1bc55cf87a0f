//! Readiness scheduler
//!
//! Pure functions of plan state. Output order is the authoring order of the
//! execution graph.

use crate::domain::{ExecutionStep, Plan, StepId};

/// Steps that are PENDING with every dependency COMPLETED
pub fn get_executable_steps(plan: &Plan) -> Vec<&ExecutionStep> {
    let completed = plan.completed_step_ids();
    plan.execution_graph.iter().filter(|s| s.is_ready(&completed)).collect()
}

/// Ids of [`get_executable_steps`], for callers that go on to mutate the plan
pub fn executable_step_ids(plan: &Plan) -> Vec<StepId> {
    get_executable_steps(plan).into_iter().map(|s| s.step_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepStatus;

    fn plan_with(steps: Vec<ExecutionStep>) -> Plan {
        let mut plan = Plan::new("intent", None);
        plan.execution_graph = steps;
        plan
    }

    fn step(id: StepId, deps: &[StepId]) -> ExecutionStep {
        ExecutionStep::new(id, "t", "m").with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_roots_are_ready() {
        let plan = plan_with(vec![step(1, &[]), step(2, &[1]), step(3, &[])]);
        assert_eq!(executable_step_ids(&plan), vec![1, 3]);
    }

    #[test]
    fn test_order_follows_authoring_not_ids() {
        let plan = plan_with(vec![step(9, &[]), step(2, &[]), step(5, &[])]);
        assert_eq!(executable_step_ids(&plan), vec![9, 2, 5]);
    }

    #[test]
    fn test_dependency_completion_unlocks() {
        let mut plan = plan_with(vec![step(1, &[]), step(2, &[1]), step(3, &[1, 2])]);
        plan.execution_graph[0].status = StepStatus::Completed;
        assert_eq!(executable_step_ids(&plan), vec![2]);

        plan.execution_graph[1].status = StepStatus::Completed;
        assert_eq!(executable_step_ids(&plan), vec![3]);
    }

    #[test]
    fn test_failed_or_skipped_dependency_blocks() {
        let mut plan = plan_with(vec![step(1, &[]), step(2, &[]), step(3, &[1]), step(4, &[2])]);
        plan.execution_graph[0].status = StepStatus::Failed;
        plan.execution_graph[1].status = StepStatus::Skipped;
        assert!(executable_step_ids(&plan).is_empty());
    }

    #[test]
    fn test_non_pending_steps_excluded() {
        let mut plan = plan_with(vec![step(1, &[]), step(2, &[])]);
        plan.execution_graph[0].status = StepStatus::InProgress;
        plan.execution_graph[1].status = StepStatus::Completed;
        assert!(get_executable_steps(&plan).is_empty());
    }

    #[test]
    fn test_repeated_calls_identical() {
        let plan = plan_with(vec![step(3, &[]), step(1, &[]), step(2, &[3])]);
        assert_eq!(executable_step_ids(&plan), executable_step_ids(&plan));
    }
}
