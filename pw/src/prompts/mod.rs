//! Prompt rendering
//!
//! Templates use Handlebars syntax. Each call resolves a template in this order:
//! 1. The named scenario's template (loaded from YAML in the scenario paths)
//! 2. The embedded default compiled from `prompts/*.pmt`
//!
//! HTML escaping is disabled; missing variables render as empty strings.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

pub mod embedded;
mod engine;
mod scenario;

pub use engine::TemplateEngine;
pub use scenario::{InputSchema, OutputSchema, Scenario, SchemaField, SchemaType, load_scenarios};

/// Prompt rendering failures
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt template not found: {0}")]
    TemplateNotFound(String),

    #[error("Failed to render template {name}: {message}")]
    Render { name: String, message: String },

    #[error("Failed to load scenario {}: {message}", path.display())]
    ScenarioLoad { path: PathBuf, message: String },
}

/// Turns a task or intent plus a context mapping into a literal prompt
pub trait PromptRenderer: Send + Sync {
    /// Prompt for executing one step
    fn render_executor_prompt(&self, scenario: &str, task: &str, context: &Value) -> Result<String, PromptError>;

    /// Planner framing of the user intent
    fn render_planner_prompt(&self, scenario: &str, user_intent: &str, context: &Value) -> Result<String, PromptError>;

    /// Render a named template
    fn render_template(&self, name: &str, context: &Value) -> Result<String, PromptError>;

    /// Human-readable problems with the input for a scenario (empty when valid)
    fn validate_input(&self, _scenario: &str, _data: &serde_json::Map<String, Value>) -> Vec<String> {
        Vec::new()
    }

    /// Names of the known scenarios
    fn list_scenarios(&self) -> Vec<String> {
        Vec::new()
    }
}
