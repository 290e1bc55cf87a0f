//! Scenario definitions
//!
//! A scenario is a YAML file bundling a planner prompt, an executor prompt and
//! the input/output fields they expect. Keys may be kebab-case or snake_case.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::PromptError;

/// Declared type of a scenario field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    MarkdownTable,
}

impl SchemaType {
    /// Whether a JSON value has this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            SchemaType::String | SchemaType::MarkdownTable => value.as_str().is_some_and(|s| !s.is_empty()),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Float => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
        }
    }
}

/// One input or output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: SchemaType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputSchema {
    #[serde(rename = "type", default)]
    pub output_type: SchemaType,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

/// A named pair of planner/executor templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "planner-prompt-template", alias = "planner_prompt_template")]
    pub planner_prompt_template: String,

    #[serde(rename = "executor-template", alias = "executor_template")]
    pub executor_template: String,

    #[serde(rename = "input-schema", alias = "input_schema", default)]
    pub input_schema: InputSchema,

    #[serde(rename = "output-schema", alias = "output_schema", default)]
    pub output_schema: OutputSchema,

    #[serde(rename = "default-planner-model", alias = "default_planner_model", default)]
    pub default_planner_model: Option<String>,

    #[serde(rename = "default-executor-model", alias = "default_executor_model", default)]
    pub default_executor_model: Option<String>,
}

impl Scenario {
    /// Parse a scenario from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Load a scenario file
    pub fn load(path: &Path) -> Result<Self, PromptError> {
        debug!(?path, "Scenario::load: called");
        let content = fs::read_to_string(path).map_err(|e| PromptError::ScenarioLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| PromptError::ScenarioLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Default values declared by input fields, used as template variables
    pub fn input_defaults(&self) -> BTreeMap<String, Value> {
        self.input_schema
            .fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect()
    }

    /// Names of required input fields missing from `data`
    pub fn missing_inputs(&self, data: &serde_json::Map<String, Value>) -> Vec<String> {
        self.input_schema
            .fields
            .iter()
            .filter(|f| f.required && !data.contains_key(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// Problems with a step output against the declared output schema
    pub fn output_problems(&self, output: &Value) -> Vec<String> {
        if self.output_schema.fields.is_empty() {
            if self.output_schema.output_type.accepts(output) {
                return Vec::new();
            }
            return vec![format!("Output is not of type {:?}", self.output_schema.output_type)];
        }

        let Some(object) = output.as_object() else {
            return vec!["Output is not an object".to_string()];
        };
        self.output_schema
            .fields
            .iter()
            .filter(|f| f.required && !object.contains_key(&f.name))
            .map(|f| format!("Missing required output field: {}", f.name))
            .collect()
    }
}

/// Load every `*.yaml`/`*.yml` scenario in the given directories
///
/// Later directories override earlier ones on name clashes. Unreadable files
/// are logged and skipped.
pub fn load_scenarios(dirs: &[PathBuf]) -> BTreeMap<String, Scenario> {
    debug!(dir_count = dirs.len(), "load_scenarios: called");
    let mut scenarios = BTreeMap::new();

    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(?dir, "load_scenarios: directory not readable, skipping");
                continue;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")))
            .collect();
        paths.sort();

        for path in paths {
            match Scenario::load(&path) {
                Ok(scenario) => {
                    info!(name = %scenario.name, path = %path.display(), "Loaded scenario");
                    scenarios.insert(scenario.name.clone(), scenario);
                }
                Err(e) => warn!("Failed to load scenario {}: {}", path.display(), e),
            }
        }
    }

    scenarios
}
