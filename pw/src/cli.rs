//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::{ContextSource, PlanStatus};

/// PlanWeaver - LLM plan orchestrator
#[derive(Debug, Parser)]
#[command(
    name = "pw",
    about = "Clarify an intent, decompose it into a step graph, and execute it with an LLM",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a planning session for an intent
    New {
        /// What you want done, in plain language
        intent: String,

        /// Scenario to plan and execute with
        #[arg(short, long)]
        scenario: Option<String>,

        /// Model used for analysis, proposals and decomposition
        #[arg(long)]
        planner_model: Option<String>,

        /// Model for every step, overriding each step's assigned model
        #[arg(long)]
        executor_model: Option<String>,
    },

    /// Show a session
    Show {
        /// Session id or unique prefix
        session: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List sessions, most recently updated first
    List {
        /// Only sessions with this status
        #[arg(short, long)]
        status: Option<PlanStatus>,

        /// Case-insensitive text to find in the intent or scenario
        #[arg(short, long)]
        query: Option<String>,

        #[arg(long, default_value_t = crate::state::DEFAULT_LIST_LIMIT)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Attach external context used by the planner
    Context {
        session: String,

        /// Where the context came from
        #[arg(long, value_enum, default_value_t = ContextKind::FileUpload)]
        source: ContextKind,

        /// Source URL, if any
        #[arg(long)]
        url: Option<String>,

        /// Summary text given to the planner
        summary: String,
    },

    /// Generate strawman proposals for a session
    Proposals {
        session: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Select a proposal and lock its approach
    Select {
        session: String,

        /// Proposal id, or its 1-based position in the list
        proposal: String,
    },

    /// Answer open questions; decomposes the plan once all are answered
    Answer {
        session: String,

        /// QUESTION=ANSWER where QUESTION is an id or 1-based position
        #[arg(short, long = "answer", value_name = "QUESTION=ANSWER")]
        answers: Vec<String>,
    },

    /// Approve a decomposed plan for execution
    Approve { session: String },

    /// Execute an approved plan
    Execute {
        session: String,

        /// Execute every step with this model
        #[arg(short, long)]
        model: Option<String>,

        /// KEY=VALUE passed to every step prompt
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List known scenarios
    Scenarios {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Fail steps left IN_PROGRESS by an interrupted execution
    Recover { session: String },
}

impl Command {
    /// Whether the command talks to a model
    pub fn needs_llm(&self) -> bool {
        matches!(
            self,
            Command::New { .. } | Command::Proposals { .. } | Command::Answer { .. } | Command::Execute { .. }
        )
    }
}

/// Output format for read commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// `--source` values for `pw context`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContextKind {
    Github,
    WebSearch,
    FileUpload,
}

impl From<ContextKind> for ContextSource {
    fn from(kind: ContextKind) -> Self {
        match kind {
            ContextKind::Github => ContextSource::Github,
            ContextKind::WebSearch => ContextSource::WebSearch,
            ContextKind::FileUpload => ContextSource::FileUpload,
        }
    }
}

/// Split `KEY=VALUE`; the value may itself contain `=`
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("Expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Path of the log file written by `pw`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planweaver")
        .join("logs")
        .join("planweaver.log")
}
