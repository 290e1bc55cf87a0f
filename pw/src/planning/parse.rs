//! Decoding of planner LLM responses
//!
//! Every decode returns either the parsed value or an explicit fallback with
//! the reason the response was rejected.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::{DEFAULT_TEMPLATE_ID, ExecutionStep, StepId, StrawmanProposal, generate_item_id};

/// Task of the single step used when decomposition fails
pub const FALLBACK_TASK: &str = "Execute user request directly";

static CODE_FENCE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").ok());

/// A decoded response or the reason it could not be used
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    Fallback { reason: String },
}

impl<T> Decoded<T> {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decoded::Fallback { .. })
    }

    fn fallback(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!(%reason, "Decoded::fallback");
        Decoded::Fallback { reason }
    }
}

/// Result of decoding a decomposition response
pub type Decomposition = Decoded<Vec<ExecutionStep>>;

impl Decomposition {
    /// The parsed steps, or the single default step
    pub fn into_steps(self, model: &str) -> Vec<ExecutionStep> {
        match self {
            Decoded::Parsed(steps) => steps,
            Decoded::Fallback { .. } => vec![ExecutionStep::new(1, FALLBACK_TASK, model)],
        }
    }
}

/// Structured reading of the user's intent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentAnalysis {
    pub identified_constraints: Vec<String>,
    pub missing_information: Vec<String>,
    pub suggested_approach: String,
    pub estimated_complexity: String,
}

impl IntentAnalysis {
    /// Analysis used when the response cannot be parsed
    pub fn fallback() -> Self {
        Self {
            identified_constraints: Vec::new(),
            missing_information: vec!["Unable to parse analysis".to_string()],
            suggested_approach: "Manual review needed".to_string(),
            estimated_complexity: "unknown".to_string(),
        }
    }
}

impl Decoded<IntentAnalysis> {
    pub fn into_analysis(self) -> IntentAnalysis {
        match self {
            Decoded::Parsed(analysis) => analysis,
            Decoded::Fallback { .. } => IntentAnalysis::fallback(),
        }
    }
}

/// Strip a surrounding markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map_or(raw.trim(), |m| m.as_str())
}

fn parse_json(raw: Option<&str>) -> Result<Value, String> {
    let raw = raw.ok_or_else(|| "empty response".to_string())?;
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err("empty response".to_string());
    }
    serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))
}

/// Decode an intent analysis object
pub fn parse_analysis(raw: Option<&str>) -> Decoded<IntentAnalysis> {
    let value = match parse_json(raw) {
        Ok(v) => v,
        Err(reason) => return Decoded::fallback(reason),
    };
    if !value.is_object() {
        return Decoded::fallback("analysis is not an object");
    }
    match serde_json::from_value(value) {
        Ok(analysis) => Decoded::Parsed(analysis),
        Err(e) => Decoded::fallback(format!("unexpected analysis shape: {}", e)),
    }
}

#[derive(Debug, Deserialize)]
struct RawStep {
    step_id: Option<StepId>,
    #[serde(default)]
    task: String,
    prompt_template_id: Option<String>,
    assigned_model: Option<String>,
    #[serde(default)]
    dependencies: Vec<StepId>,
}

/// Pull the list of items out of a bare array or an object wrapping one
fn items(value: Value, key: &str) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Decode a step list
///
/// Accepts `[...]` or `{"steps": [...]}`. Entries that are not step objects
/// or have an empty task are dropped; a missing `step_id` becomes the entry's
/// 1-based position and a missing `assigned_model` becomes `default_model`.
pub fn parse_decomposition(raw: Option<&str>, default_model: &str) -> Decomposition {
    let value = match parse_json(raw) {
        Ok(v) => v,
        Err(reason) => return Decoded::fallback(reason),
    };
    let Some(entries) = items(value, "steps") else {
        return Decoded::fallback("response is not a step list");
    };

    let steps: Vec<ExecutionStep> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let raw: RawStep = serde_json::from_value(entry).ok()?;
            if raw.task.trim().is_empty() {
                return None;
            }
            let position = StepId::try_from(idx + 1).unwrap_or(StepId::MAX);
            let model = raw
                .assigned_model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| default_model.to_string());
            Some(
                ExecutionStep::new(raw.step_id.unwrap_or(position), raw.task, model)
                    .with_template(raw.prompt_template_id.unwrap_or_else(|| DEFAULT_TEMPLATE_ID.to_string()))
                    .with_dependencies(raw.dependencies),
            )
        })
        .collect();

    if steps.is_empty() {
        return Decoded::fallback("no usable steps in response");
    }
    Decoded::Parsed(steps)
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    pros: Vec<String>,
    #[serde(default)]
    cons: Vec<String>,
}

/// Decode strawman proposals from `[...]` or `{"proposals": [...]}`
pub fn parse_proposals(raw: Option<&str>) -> Decoded<Vec<StrawmanProposal>> {
    let value = match parse_json(raw) {
        Ok(v) => v,
        Err(reason) => return Decoded::fallback(reason),
    };
    let Some(entries) = items(value, "proposals") else {
        return Decoded::fallback("response is not a proposal list");
    };

    let proposals: Vec<StrawmanProposal> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawProposal>(entry).ok())
        .map(|p| StrawmanProposal {
            id: generate_item_id(),
            title: p.title,
            description: p.description,
            pros: p.pros,
            cons: p.cons,
            selected: false,
        })
        .collect();
    Decoded::Parsed(proposals)
}
