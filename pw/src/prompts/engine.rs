//! Handlebars-backed prompt renderer

use std::collections::BTreeMap;
use std::path::PathBuf;

use handlebars::{Handlebars, handlebars_helper, no_escape};
use serde_json::Value;
use tracing::debug;

use super::scenario::{Scenario, load_scenarios};
use super::{PromptError, PromptRenderer, embedded};

handlebars_helper!(json_helper: |v: Json| match v {
    Value::String(s) => s.clone(),
    other => other.to_string(),
});

handlebars_helper!(json_pretty_helper: |v: Json| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()));

/// Renders embedded and scenario templates
///
/// Unknown or empty scenario names fall back to the embedded defaults.
pub struct TemplateEngine {
    hbs: Handlebars<'static>,
    scenarios: BTreeMap<String, Scenario>,
}

impl TemplateEngine {
    /// Create an engine over an explicit scenario set
    pub fn new(scenarios: BTreeMap<String, Scenario>) -> Result<Self, PromptError> {
        debug!(scenario_count = scenarios.len(), "TemplateEngine::new: called");
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(no_escape);
        hbs.register_helper("json", Box::new(json_helper));
        hbs.register_helper("json_pretty", Box::new(json_pretty_helper));

        for (name, template) in embedded::ALL {
            hbs.register_template_string(name, *template)
                .map_err(|e| PromptError::Render {
                    name: name.to_string(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self { hbs, scenarios })
    }

    /// Engine with embedded templates only
    pub fn embedded_only() -> Result<Self, PromptError> {
        Self::new(BTreeMap::new())
    }

    /// Engine with scenarios loaded from the given directories
    pub fn from_paths(dirs: &[PathBuf]) -> Result<Self, PromptError> {
        Self::new(load_scenarios(dirs))
    }

    pub fn get_scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    fn render_str(&self, name: &str, template: &str, data: &Value) -> Result<String, PromptError> {
        self.hbs.render_template(template, data).map_err(|e| PromptError::Render {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Merge scenario defaults, the caller's context and one named variable
    fn template_data(&self, scenario: Option<&Scenario>, context: &Value, key: &str, value: &str) -> Value {
        let mut data = serde_json::Map::new();
        if let Some(scenario) = scenario {
            data.extend(scenario.input_defaults());
        }
        if let Value::Object(ctx) = context {
            data.extend(ctx.clone());
        }
        data.insert(key.to_string(), Value::from(value));
        Value::Object(data)
    }
}

impl PromptRenderer for TemplateEngine {
    fn render_executor_prompt(&self, scenario: &str, task: &str, context: &Value) -> Result<String, PromptError> {
        debug!(%scenario, "render_executor_prompt: called");
        match self.scenarios.get(scenario) {
            Some(s) => {
                let data = self.template_data(Some(s), context, "task", task);
                self.render_str(&s.name, &s.executor_template, &data)
            }
            None => {
                let data = self.template_data(None, context, "task", task);
                self.render_template("executor", &data)
            }
        }
    }

    fn render_planner_prompt(&self, scenario: &str, user_intent: &str, context: &Value) -> Result<String, PromptError> {
        debug!(%scenario, "render_planner_prompt: called");
        match self.scenarios.get(scenario) {
            Some(s) => {
                let data = self.template_data(Some(s), context, "user_intent", user_intent);
                self.render_str(&s.name, &s.planner_prompt_template, &data)
            }
            None => {
                let data = self.template_data(None, context, "user_intent", user_intent);
                self.render_template("planner", &data)
            }
        }
    }

    fn render_template(&self, name: &str, context: &Value) -> Result<String, PromptError> {
        if !self.hbs.has_template(name) {
            return Err(PromptError::TemplateNotFound(name.to_string()));
        }
        self.hbs.render(name, context).map_err(|e| PromptError::Render {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    fn validate_input(&self, scenario: &str, data: &serde_json::Map<String, Value>) -> Vec<String> {
        self.scenarios
            .get(scenario)
            .map(|s| {
                s.missing_inputs(data)
                    .into_iter()
                    .map(|f| format!("Missing required field: {}", f))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn list_scenarios(&self) -> Vec<String> {
        self.scenarios.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with_scenario() -> TemplateEngine {
        let scenario = Scenario::from_yaml(
            r#"
name: docs
description: Write documentation
planner-prompt-template: "Document {{user_intent}} for {{audience}}"
executor-template: "Write: {{task}} <{{tone}}>"
input-schema:
  fields:
    - name: audience
      description: Readers
      default: developers
    - name: tone
      description: Voice
      required: false
"#,
        )
        .unwrap();
        TemplateEngine::new(BTreeMap::from([(scenario.name.clone(), scenario)])).unwrap()
    }

    #[test]
    fn test_default_executor_prompt() {
        let engine = TemplateEngine::embedded_only().unwrap();
        let context = json!({
            "locked_constraints": {"language": "rust", "max_files": 3},
            "previous_outputs": {"1": "schema.sql created"},
        });
        let prompt = engine.render_executor_prompt("", "Write the migration", &context).unwrap();

        assert!(prompt.starts_with("Task: Write the migration"));
        assert!(prompt.contains("- language: rust"));
        assert!(prompt.contains("- max_files: 3"));
        assert!(prompt.contains("--- Step 1 ---"));
        assert!(prompt.contains("schema.sql created"));
    }

    #[test]
    fn test_default_executor_prompt_without_extras() {
        let engine = TemplateEngine::embedded_only().unwrap();
        let prompt = engine
            .render_executor_prompt("unknown", "Just do it", &json!({"locked_constraints": {}, "previous_outputs": {}}))
            .unwrap();
        assert!(prompt.contains("Task: Just do it"));
        assert!(!prompt.contains("Locked constraints"));
        assert!(!prompt.contains("prerequisite"));
    }

    #[test]
    fn test_no_html_escaping() {
        let engine = TemplateEngine::embedded_only().unwrap();
        let prompt = engine.render_executor_prompt("", "Use <T> & 'quotes'", &json!({})).unwrap();
        assert!(prompt.contains("Use <T> & 'quotes'"));
    }

    #[test]
    fn test_scenario_templates_and_defaults() {
        let engine = engine_with_scenario();
        let planner = engine.render_planner_prompt("docs", "the CLI", &json!({})).unwrap();
        assert_eq!(planner, "Document the CLI for developers");

        let executor = engine
            .render_executor_prompt("docs", "Usage section", &json!({"tone": "friendly"}))
            .unwrap();
        assert_eq!(executor, "Write: Usage section <friendly>");
    }

    #[test]
    fn test_planner_prompt_with_external_context() {
        let engine = TemplateEngine::embedded_only().unwrap();
        let context = json!({
            "external_contexts": [
                {"index": 1, "source_type": "GITHUB", "content_summary": "Repo uses axum"}
            ]
        });
        let prompt = engine.render_planner_prompt("", "Add OAuth", &context).unwrap();
        assert!(prompt.contains("=== AVAILABLE CONTEXT ==="));
        assert!(prompt.contains("--- Context Source 1 (GITHUB) ---"));
        assert!(prompt.contains("Repo uses axum"));
        assert!(prompt.trim_end().ends_with("User Request: Add OAuth"));
    }

    #[test]
    fn test_planner_prompt_without_context_is_plain() {
        let engine = TemplateEngine::embedded_only().unwrap();
        let prompt = engine.render_planner_prompt("", "Add OAuth", &json!({})).unwrap();
        assert_eq!(prompt.trim(), "User Request: Add OAuth");
    }

    #[test]
    fn test_unknown_template() {
        let engine = TemplateEngine::embedded_only().unwrap();
        assert!(matches!(
            engine.render_template("nope", &json!({})),
            Err(PromptError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_validate_input_and_list() {
        let engine = engine_with_scenario();
        assert_eq!(engine.list_scenarios(), vec!["docs".to_string()]);
        assert_eq!(
            engine.validate_input("docs", &serde_json::Map::new()),
            vec!["Missing required field: audience".to_string()]
        );
        assert!(engine.validate_input("unknown", &serde_json::Map::new()).is_empty());
    }
}
