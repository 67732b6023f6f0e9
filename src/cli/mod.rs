//! Command-line interface for autoplay.
//!
//! Provides commands for running and checking playbooks, listing the
//! registered actions, and inspecting journaled runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::actions::global_registry;
use crate::config;
use crate::core::{ExecutionMode, Journal, Playbook, PlaybookExecutor};
use crate::domain::RunState;

/// autoplay - Declarative playbook runner
#[derive(Parser, Debug)]
#[command(name = "autoplay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a playbook
    Run {
        /// Playbook file, or a name looked up in the playbooks directory
        playbook: String,

        /// Initial variable (repeatable); the value is parsed as YAML
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,

        /// Record step failures and continue instead of aborting
        #[arg(long)]
        best_effort: bool,

        /// Write step events to the journal
        #[arg(long, env = "AUTOPLAY_JOURNAL")]
        journal: bool,
    },

    /// Check that every action a playbook references is registered
    Check {
        /// Playbook file or name
        playbook: String,
    },

    /// List registered actions
    Actions {
        /// Print full specs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a journaled run
    Report {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List journaled runs
    Runs,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                playbook,
                vars,
                best_effort,
                journal,
            } => run_playbook(&playbook, vars, best_effort, journal).await,
            Commands::Check { playbook } => check_playbook(&playbook),
            Commands::Actions { json } => list_actions(json),
            Commands::Report { run_id } => show_report(&run_id).await,
            Commands::Runs => list_runs().await,
            Commands::Config => show_config(),
        }
    }
}

/// Parse `name=value`; the value is read as YAML so numbers and lists work
fn parse_var(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err("variable name must not be empty".to_string());
    }
    let value = serde_yaml::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Run a playbook and print its result as JSON
async fn run_playbook(
    name: &str,
    vars: Vec<(String, Value)>,
    best_effort: bool,
    journal: bool,
) -> Result<()> {
    let playbook = load_playbook(name)?;
    let cfg = config::config()?;

    let mut options = cfg.execution.executor_options();
    if best_effort {
        options.mode = ExecutionMode::BestEffort;
    }

    let mut executor = PlaybookExecutor::global().with_options(options);
    if journal {
        executor = executor.with_observer(Arc::new(Journal::open_default()?));
    }

    let variables: Map<String, Value> = vars.into_iter().collect();
    let outcome = executor.execute_with(&playbook, variables).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.result)?);

    if outcome.failures.is_empty() {
        eprintln!("\n[Run {} completed successfully]", outcome.run_id);
    } else {
        eprintln!(
            "\n[Run {} completed with {} failed step(s)]",
            outcome.run_id,
            outcome.failures.len()
        );
        for failure in &outcome.failures {
            eprintln!("  {} ({}): {}", failure.path, failure.action, failure.error);
        }
        std::process::exit(2);
    }

    Ok(())
}

/// Statically check a playbook against the registry
fn check_playbook(name: &str) -> Result<()> {
    let playbook = load_playbook(name)?;
    let errors = PlaybookExecutor::global().check(&playbook);

    if errors.is_empty() {
        println!("Playbook '{}' OK", playbook.label());
        return Ok(());
    }

    for error in &errors {
        eprintln!("  {}", error);
    }
    anyhow::bail!("{} problem(s) found in '{}'", errors.len(), playbook.label())
}

/// List registered actions
fn list_actions(json: bool) -> Result<()> {
    let registry = global_registry();

    if json {
        let specs: Vec<Value> = registry.specs().into_iter().map(|s| s.to_value()).collect();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }

    println!("{:<20} {}", "ACTION", "DESCRIPTION");
    println!("{}", "-".repeat(75));
    for spec in registry.specs() {
        println!("{:<20} {}", spec.name, spec.description);
        for arg in &spec.arguments {
            let required = if arg.required { "required" } else { "optional" };
            println!("    {:<16} {:<8} {}", arg.name, arg.arg_type, required);
        }
    }

    Ok(())
}

/// Show a journaled run
async fn show_report(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let journal = Journal::open_default()?;
    let report = journal
        .report(run_id)
        .await?
        .with_context(|| format!("No events found for run {}", run_id))?;

    println!("Run ID: {}", report.id);
    println!("Playbook: {}", report.playbook);
    println!("State: {:?}", report.state);
    println!("Started: {}", report.started_at);
    if let Some(completed) = report.completed_at {
        println!("Completed: {}", completed);
    }

    let mut steps: Vec<_> = report.step_statuses.iter().collect();
    steps.sort_by(|a, b| a.0.cmp(b.0));
    println!("\nStep statuses:");
    for (path, status) in steps {
        println!("  {}: {:?}", path, status);
    }

    if !report.failures.is_empty() {
        println!("\nFailures:");
        for failure in &report.failures {
            println!("  {} ({}): {}", failure.path, failure.action, failure.error);
        }
    }

    if let Some(result) = &report.result {
        println!("\nResult: {}", result);
    }

    Ok(())
}

/// List journaled runs
async fn list_runs() -> Result<()> {
    let journal = Journal::open_default()?;
    let runs = journal.list_runs().await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<15}", "RUN ID", "PLAYBOOK", "STATE");
    println!("{}", "-".repeat(75));

    for run_id in runs {
        let Some(report) = journal.report(run_id).await? else {
            continue;
        };
        let state = match &report.state {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed { .. } => "failed",
        };
        println!("{:<38} {:<20} {:<15}", report.id, report.playbook, state);
    }

    Ok(())
}

/// Load a playbook from a path, or by name from the playbooks directory
fn load_playbook(name: &str) -> Result<Playbook> {
    let direct = PathBuf::from(name);
    if direct.is_file() {
        return Playbook::from_file(&direct)
            .with_context(|| format!("Failed to load playbook: {}", direct.display()));
    }

    let dir = config::playbooks_dir()?;
    let candidates = [
        dir.join(format!("{}.yaml", name)),
        dir.join(format!("{}.yml", name)),
    ];

    for path in &candidates {
        if path.is_file() {
            return Playbook::from_file(path)
                .with_context(|| format!("Failed to load playbook: {}", path.display()));
        }
    }

    anyhow::bail!(
        "Playbook '{}' not found. Looked for:\n  - {}\n  - {}\n  - {}",
        name,
        direct.display(),
        candidates[0].display(),
        candidates[1].display()
    )
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("autoplay configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Playbooks:           {}", cfg.playbooks.display());
    println!("  Journal:             {}", config::journal_dir()?.display());
    println!();
    println!("Execution:");
    println!("  Best effort:    {}", cfg.execution.best_effort);
    println!("  Max steps:      {}", cfg.execution.limits.max_steps);
    println!("  Max depth:      {}", cfg.execution.limits.max_depth);
    println!("  Step timeout:   {}s", cfg.execution.limits.step_timeout_seconds);
    println!("  Run timeout:    {}s", cfg.execution.limits.run_timeout_seconds);

    Ok(())
}
