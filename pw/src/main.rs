//! PlanWeaver - LLM plan orchestrator
//!
//! CLI entry point for planning sessions and plan execution.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::{Map, Value};
use tracing::{debug, info};

use planweaver::cli::{Cli, Command, OutputFormat, get_log_path, parse_key_value};
use planweaver::config::Config;
use planweaver::domain::{Plan, PlanStatus, StepStatus};
use planweaver::llm::{LlmClient, LlmError, UnconfiguredClient, create_client};
use planweaver::orchestrator::{Orchestrator, SessionOptions};
use planweaver::prompts::{PromptRenderer, TemplateEngine};
use planweaver::state::{PlanQuery, StateManager};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    if cli.command.needs_llm() {
        config.validate()?;
    }

    let renderer: Arc<dyn PromptRenderer> = Arc::new(TemplateEngine::from_paths(&config.scenarios.expanded_paths())?);

    let llm: Arc<dyn LlmClient> = match create_client(&config.llm) {
        Ok(client) => client,
        Err(LlmError::MissingApiKey(env)) => Arc::new(UnconfiguredClient::new(env)),
        Err(e) => return Err(e.into()),
    };

    let state = StateManager::spawn(config.storage.store_path()).context("Failed to open plan store")?;
    let orchestrator = Orchestrator::new(llm, renderer.clone(), Arc::new(state.clone()), &config);

    debug!(command = ?cli.command, "main: dispatching command");
    let result = dispatch(&orchestrator, renderer.as_ref(), cli.command).await;
    let _ = state.shutdown().await;
    result
}

async fn dispatch(orchestrator: &Orchestrator, renderer: &dyn PromptRenderer, command: Command) -> Result<()> {
    match command {
        Command::New {
            intent,
            scenario,
            planner_model,
            executor_model,
        } => {
            let options = SessionOptions {
                scenario_name: scenario,
                planner_model,
                executor_model,
                external_contexts: Vec::new(),
            };
            let plan = orchestrator.start_session(&intent, options).await?;
            println!("{} Started session {}", "✓".green(), plan.session_id.cyan());
            print_plan(&plan);
            Ok(())
        }
        Command::Show { session, format } => {
            let plan = orchestrator.get_session(&session).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                OutputFormat::Text => print_plan(&plan),
            }
            Ok(())
        }
        Command::List {
            status,
            query,
            limit,
            offset,
            format,
        } => {
            let page = orchestrator
                .list_sessions(PlanQuery {
                    status,
                    query,
                    limit,
                    offset,
                })
                .await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&page)?),
                OutputFormat::Text if page.sessions.is_empty() => println!("No sessions found"),
                OutputFormat::Text => {
                    for s in &page.sessions {
                        println!(
                            "{}  {:<18} {}",
                            s.session_id.cyan(),
                            colored_status(s.status),
                            truncate(&s.user_intent, 60)
                        );
                    }
                    println!(
                        "{}",
                        format!(
                            "{} of {} (offset {})",
                            page.sessions.len(),
                            page.total,
                            page.offset
                        )
                        .dimmed()
                    );
                }
            }
            Ok(())
        }
        Command::Context {
            session,
            source,
            url,
            summary,
        } => {
            let plan = orchestrator
                .add_external_context(&session, source.into(), url, &summary)
                .await?;
            println!(
                "{} Added context to {} ({} total)",
                "✓".green(),
                plan.session_id.cyan(),
                plan.external_contexts.len()
            );
            Ok(())
        }
        Command::Proposals { session, format } => {
            let proposals = orchestrator.generate_proposals(&session).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&proposals)?),
                OutputFormat::Text if proposals.is_empty() => println!("No proposals generated"),
                OutputFormat::Text => {
                    for (i, p) in proposals.iter().enumerate() {
                        println!("{}. {} {}", i + 1, p.title.bold(), format!("[{}]", p.id).dimmed());
                        println!("   {}", p.description);
                        for pro in &p.pros {
                            println!("   {} {}", "+".green(), pro);
                        }
                        for con in &p.cons {
                            println!("   {} {}", "-".red(), con);
                        }
                    }
                }
            }
            Ok(())
        }
        Command::Select { session, proposal } => {
            let plan = orchestrator.get_session(&session).await?;
            let proposal_id = resolve_position(&proposal, plan.strawman_proposals.iter().map(|p| p.id.as_str()));
            let plan = orchestrator.select_proposal(&plan.session_id, &proposal_id).await?;
            let title = plan
                .strawman_proposals
                .iter()
                .find(|p| p.selected)
                .map(|p| p.title.clone())
                .unwrap_or_default();
            println!("{} Selected approach: {}", "✓".green(), title.bold());
            Ok(())
        }
        Command::Answer { session, answers } => {
            let plan = orchestrator.get_session(&session).await?;
            let mut resolved = BTreeMap::new();
            for raw in &answers {
                let (question, answer) = parse_key_value(raw).map_err(|e| eyre!(e))?;
                let question_id = resolve_position(&question, plan.open_questions.iter().map(|q| q.id.as_str()));
                resolved.insert(question_id, answer);
            }
            let plan = orchestrator.answer_questions(&plan.session_id, &resolved).await?;
            if plan.status == PlanStatus::AwaitingApproval {
                println!(
                    "{} Plan decomposed into {} steps; run `pw approve {}`",
                    "✓".green(),
                    plan.execution_graph.len(),
                    plan.session_id
                );
            } else {
                println!(
                    "{} Recorded answers; {} question(s) still open",
                    "✓".green(),
                    plan.unanswered_questions().count()
                );
            }
            print_plan(&plan);
            Ok(())
        }
        Command::Approve { session } => {
            let plan = orchestrator.approve_plan(&session).await?;
            println!("{} Approved {}", "✓".green(), plan.session_id.cyan());
            Ok(())
        }
        Command::Execute {
            session,
            model,
            context,
            format,
        } => {
            let mut ctx = Map::new();
            for raw in &context {
                let (key, value) = parse_key_value(raw).map_err(|e| eyre!(e))?;
                ctx.insert(key, Value::String(value));
            }
            let result = orchestrator.execute(&session, &ctx, model.as_deref()).await?;
            let plan = &result.plan;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
                OutputFormat::Text => print_plan(plan),
            }
            if plan.status == PlanStatus::Failed {
                for (step_id, error) in &result.report.failed_steps {
                    eprintln!("{} step {}: {}", "✗".red(), step_id, error);
                }
                if result.report.budget_exhausted {
                    eprintln!("{} step budget exhausted", "✗".red());
                }
                return Err(eyre!("Plan {} failed", plan.session_id));
            }
            Ok(())
        }
        Command::Recover { session } => {
            let (plan, recovered) = orchestrator.recover_stuck(&session).await?;
            if recovered.is_empty() {
                println!("No stuck steps in {}", plan.session_id.cyan());
            } else {
                println!(
                    "{} Marked {} stuck step(s) FAILED: {:?}",
                    "✓".green(),
                    recovered.len(),
                    recovered
                );
            }
            Ok(())
        }
        Command::Scenarios { format } => cmd_scenarios(renderer, format),
    }
}

fn cmd_scenarios(renderer: &dyn PromptRenderer, format: OutputFormat) -> Result<()> {
    let names = renderer.list_scenarios();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Text if names.is_empty() => println!("No scenarios found"),
        OutputFormat::Text => names.iter().for_each(|n| println!("{}", n)),
    }
    Ok(())
}

/// A 1-based position into `ids`, or the input unchanged
fn resolve_position<'a>(input: &str, ids: impl Iterator<Item = &'a str>) -> String {
    input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| ids.into_iter().nth(idx))
        .map_or_else(|| input.to_string(), str::to_string)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

fn colored_status(status: PlanStatus) -> ColoredString {
    match status {
        PlanStatus::Completed => status.as_str().green(),
        PlanStatus::Failed => status.as_str().red(),
        PlanStatus::Executing => status.as_str().yellow(),
        PlanStatus::Approved => status.as_str().blue(),
        _ => status.as_str().normal(),
    }
}

fn colored_step_status(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Completed => status.as_str().green(),
        StepStatus::Failed => status.as_str().red(),
        StepStatus::InProgress => status.as_str().yellow(),
        StepStatus::Skipped => status.as_str().dimmed(),
        StepStatus::Pending => status.as_str().normal(),
    }
}

fn print_plan(plan: &Plan) {
    println!("Session:  {}", plan.session_id.cyan());
    println!("Status:   {}", colored_status(plan.status));
    println!("Intent:   {}", plan.user_intent);
    if let Some(scenario) = &plan.scenario_name {
        println!("Scenario: {}", scenario);
    }

    if !plan.locked_constraints.is_empty() {
        println!("\n{}", "Locked constraints".bold());
        for (key, value) in &plan.locked_constraints {
            let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            println!("  {}: {}", key, value);
        }
    }

    if !plan.open_questions.is_empty() {
        println!("\n{}", "Open questions".bold());
        for (i, q) in plan.open_questions.iter().enumerate() {
            let mark = if q.answered { "✓".green() } else { "?".yellow() };
            println!("  {} {}. {} {}", mark, i + 1, q.question, format!("[{}]", q.id).dimmed());
            if let Some(answer) = &q.answer {
                println!("       {}", answer);
            }
        }
    }

    if !plan.execution_graph.is_empty() {
        println!("\n{}", "Steps".bold());
        for step in &plan.execution_graph {
            let deps = if step.dependencies.is_empty() {
                String::new()
            } else {
                let ids: Vec<String> = step.dependencies.iter().map(|d| d.to_string()).collect();
                format!(" (after {})", ids.join(", "))
            };
            println!(
                "  {:>3}. [{}] {}{}",
                step.step_id,
                colored_step_status(step.status),
                step.task,
                deps.dimmed()
            );
            if let Some(error) = &step.error {
                println!("       {}", error.red());
            }
        }
    }

    if let Some(output) = &plan.final_output {
        println!("\n{}", "Output".bold());
        for (key, value) in output {
            println!("--- {} ---", key.cyan());
            println!("{}", value);
        }
    }
}
