//! Dependency graph validation
//!
//! Structural checks run once before the execution loop mutates anything.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::domain::{ExecutionStep, StepId};

/// A malformed execution graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate step id {step_id}")]
    DuplicateStep { step_id: StepId },

    #[error("Step {step_id} depends on itself")]
    SelfDependency { step_id: StepId },

    #[error("Step {step_id} depends on missing step {dependency}")]
    MissingDependency { step_id: StepId, dependency: StepId },

    #[error("Dependency cycle: {}", format_path(.path))]
    Cycle { path: Vec<StepId> },
}

fn format_path(path: &[StepId]) -> String {
    path.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Validate an execution graph
///
/// Checks run in this order, each over the whole graph in authoring order:
/// duplicate ids, self-dependencies, missing dependencies, cycles.
pub fn validate_graph(steps: &[ExecutionStep]) -> Result<(), GraphError> {
    debug!(step_count = steps.len(), "validate_graph: called");

    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.step_id) {
            debug!(step_id = step.step_id, "validate_graph: duplicate");
            return Err(GraphError::DuplicateStep { step_id: step.step_id });
        }
    }

    for step in steps {
        if step.dependencies.contains(&step.step_id) {
            return Err(GraphError::SelfDependency { step_id: step.step_id });
        }
    }

    for step in steps {
        if let Some(&dependency) = step.dependencies.iter().find(|dep| !seen.contains(dep)) {
            return Err(GraphError::MissingDependency {
                step_id: step.step_id,
                dependency,
            });
        }
    }

    let graph: HashMap<StepId, &ExecutionStep> = steps.iter().map(|s| (s.step_id, s)).collect();
    let mut visited = HashSet::new();
    let mut visiting = HashSet::new();
    let mut path = Vec::new();

    for step in steps {
        if !visited.contains(&step.step_id)
            && has_cycle_dfs(step.step_id, &graph, &mut visited, &mut visiting, &mut path)
        {
            // Drop the DFS prefix that leads into the cycle
            let start = path
                .last()
                .and_then(|repeated| path.iter().position(|id| id == repeated))
                .unwrap_or(0);
            path.drain(..start);
            debug!(?path, "validate_graph: cycle detected");
            return Err(GraphError::Cycle { path });
        }
    }

    debug!("validate_graph: ok");
    Ok(())
}

/// DFS helper for cycle detection
///
/// `visiting` holds the nodes on the current path; reaching one of them again
/// is a back edge. Fully `visited` nodes are skipped. On a cycle, `path` ends
/// with the repeated node and may start with nodes outside the cycle.
fn has_cycle_dfs(
    node: StepId,
    graph: &HashMap<StepId, &ExecutionStep>,
    visited: &mut HashSet<StepId>,
    visiting: &mut HashSet<StepId>,
    path: &mut Vec<StepId>,
) -> bool {
    visiting.insert(node);
    path.push(node);

    if let Some(step) = graph.get(&node) {
        for &dep in &step.dependencies {
            if visiting.contains(&dep) {
                debug!(%node, %dep, "has_cycle_dfs: back edge");
                path.push(dep);
                return true;
            }
            if !visited.contains(&dep) && has_cycle_dfs(dep, graph, visited, visiting, path) {
                return true;
            }
        }
    }

    visiting.remove(&node);
    visited.insert(node);
    path.pop();
    false
}
