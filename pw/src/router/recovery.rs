//! Recovery of steps left IN_PROGRESS by an interrupted execution
//!
//! A step stuck IN_PROGRESS may or may not have reached the provider, so it
//! is never re-run automatically. Recovery marks it FAILED and fails the
//! plan; running the work again needs a new plan.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{Plan, PlanStatus, StepId, StepStatus};

/// Default age after which an IN_PROGRESS step counts as stuck
pub const DEFAULT_STUCK_AFTER: Duration = Duration::from_secs(3600);

/// A step found IN_PROGRESS for longer than the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckStep {
    pub step_id: StepId,
    pub started_at: Option<i64>,
    pub age_ms: i64,
}

/// IN_PROGRESS steps whose `started_at` is older than `threshold` at `now_ms`
///
/// A step with no `started_at` is always reported.
pub fn find_stuck_steps(plan: &Plan, now_ms: i64, threshold: Duration) -> Vec<StuckStep> {
    let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
    plan.execution_graph
        .iter()
        .filter(|s| s.status == StepStatus::InProgress)
        .filter_map(|s| {
            let age_ms = s.started_at.map_or(i64::MAX, |started| now_ms.saturating_sub(started));
            (age_ms > threshold_ms).then_some(StuckStep {
                step_id: s.step_id,
                started_at: s.started_at,
                age_ms,
            })
        })
        .collect()
}

/// Mark stuck steps FAILED and, if any were found, the plan FAILED
///
/// Returns the ids of the steps that were failed.
pub fn recover_stuck_steps(plan: &mut Plan, now_ms: i64, threshold: Duration) -> Vec<StepId> {
    let stuck = find_stuck_steps(plan, now_ms, threshold);
    if stuck.is_empty() {
        return Vec::new();
    }

    let mut recovered = Vec::with_capacity(stuck.len());
    for s in &stuck {
        let Some(step) = plan.step_mut(s.step_id) else {
            continue;
        };
        let message = format!("Interrupted while in progress (started {})", format_started(s.started_at));
        match step.fail(message, now_ms) {
            Ok(()) => {
                warn!(session_id = %plan.session_id, step_id = s.step_id, "Recovered stuck step as FAILED");
                recovered.push(s.step_id);
            }
            Err(e) => warn!(step_id = s.step_id, error = %e, "Could not fail stuck step"),
        }
    }

    if !recovered.is_empty() && !plan.status.is_terminal() {
        plan.status = PlanStatus::Failed;
    }
    plan.touch();
    info!(session_id = %plan.session_id, count = recovered.len(), "Recovery finished");
    recovered
}

fn format_started(started_at: Option<i64>) -> String {
    started_at
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}
