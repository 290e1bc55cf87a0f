//! PlanWeaver - LLM plan orchestrator
//!
//! PlanWeaver takes a natural-language intent, clarifies it with an LLM,
//! decomposes it into a dependency graph of steps, and executes that graph.
//!
//! # Core Concepts
//!
//! - **Validated graphs**: duplicate ids, self-dependencies, missing
//!   dependencies and cycles are rejected before any step runs
//! - **Readiness**: a step runs only when every dependency is COMPLETED
//! - **Bounded retries**: each step gets a fixed number of attempts with
//!   exponential backoff
//! - **Fail-fast**: one FAILED step fails the whole plan
//!
//! # Modules
//!
//! - [`domain`] - Plan and step types and their state machines
//! - [`router`] - Graph validation, scheduling, step execution, plan loop
//! - [`planning`] - Intent analysis, proposals and decomposition
//! - [`llm`] - LLM client trait and provider adapters
//! - [`prompts`] - Handlebars prompt rendering and scenarios
//! - [`state`] - Plan persistence actor
//! - [`orchestrator`] - Session lifecycle composition root
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod llm;
pub mod orchestrator;
pub mod planning;
pub mod prompts;
pub mod router;
pub mod state;

// Re-export commonly used types
pub use config::{Config, LlmConfig};
pub use domain::{ExecutionStep, Plan, PlanStatus, StepId, StepStatus};
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, create_client};
pub use orchestrator::{Orchestrator, OrchestratorError, SessionOptions};
pub use planning::{Planner, PlannerError};
pub use prompts::{PromptRenderer, TemplateEngine};
pub use router::{ExecutionError, ExecutionReport, ExecutionRouter, GraphError, RouterConfig, validate_graph};
pub use state::{PlanRepository, StateError, StateManager};
