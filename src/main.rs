use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use metacog_decision::{
    collaborators::{Collaborators, StaticToolCatalog},
    config::{Config, LogFormat},
    engine::{Context, FeedbackTarget, GoldenExport, HybridToolSelector, Outcome},
    storage::SqliteStore,
    DecisionEngine, LearningState,
};

/// Metacognitive decision engine with offline heuristic collaborators.
#[derive(Debug, Parser)]
#[command(name = "metacog-decision", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one decision session and print it as JSON.
    Decide {
        /// The query to decide on.
        query: String,
        /// Context entries as key=value; values that parse as JSON are kept as JSON.
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,
        /// Report the execution outcome of the chosen path right away.
        #[arg(long, value_enum)]
        outcome: Option<OutcomeArg>,
    },
    /// Print path statistics, tool statistics and golden templates.
    Stats,
    /// Select a builtin tool for a task and invoke it.
    Tool {
        /// Task description used for semantic matching.
        task: String,
    },
    /// Move golden templates between deployments.
    Golden {
        #[command(subcommand)]
        action: GoldenAction,
    },
}

#[derive(Debug, Subcommand)]
enum GoldenAction {
    /// Print all templates, or write them to a file.
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load templates from an export file.
    Import {
        path: PathBuf,
        /// Drop the current templates first instead of merging.
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Success,
    Failure,
}

impl From<OutcomeArg> for Outcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Success => Outcome::Success,
            OutcomeArg::Failure => Outcome::Failure,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Metacog decision engine starting...");

    // Persistence is optional; without it the engine starts cold and forgets.
    let store = match SqliteStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Some(s)
        }
        Err(e) => {
            warn!(error = %e, "Database unavailable, running without persistence");
            None
        }
    };

    let state = LearningState::new(&config);
    if let Some(store) = &store {
        state.hydrate(store).await;
    }

    let output = match cli.command {
        Command::Decide {
            query,
            context,
            outcome,
        } => decide(config, state.clone(), &query, parse_context(&context), outcome).await?,
        Command::Stats => stats(&state).await,
        Command::Tool { task } => {
            let selector = HybridToolSelector::new(
                Arc::new(StaticToolCatalog::builtin()),
                state.tools.clone(),
                &config,
            );
            let outcome = selector.invoke(&task, &json!({ "task": task })).await?;
            serde_json::to_value(&outcome)?
        }
        Command::Golden { action } => golden(&state, action).await?,
    };

    if let Some(store) = &store {
        if let Err(e) = state.flush(store).await {
            error!(error = %e, "Failed to persist learning state");
        }
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn decide(
    config: Config,
    state: LearningState,
    query: &str,
    context: Context,
    outcome: Option<OutcomeArg>,
) -> anyhow::Result<Value> {
    let engine = DecisionEngine::new(config, Collaborators::heuristic(), state)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling decision");
            on_interrupt.cancel();
        }
    });

    let session = engine.decide_with_cancel(query, context, cancel).await;
    info!(summary = %session.summary(), "Decision complete");

    let mut output = serde_json::to_value(&session)?;
    if let Some(outcome) = outcome {
        match engine
            .apply_feedback(FeedbackTarget::Session(&session), outcome.into(), reward(outcome))
            .await
        {
            Ok(receipt) => output["feedback"] = serde_json::to_value(&receipt)?,
            Err(e) => warn!(error = %e, "Feedback not applied"),
        }
    }
    Ok(output)
}

fn reward(outcome: OutcomeArg) -> f64 {
    match outcome {
        OutcomeArg::Success => 1.0,
        OutcomeArg::Failure => -1.0,
    }
}

async fn stats(state: &LearningState) -> Value {
    json!({
        "paths": state.paths.all().await,
        "tools": state.tools.all().await,
        "golden": {
            "summary": state.golden.summary().await,
            "templates": state.golden.all().await,
        },
    })
}

async fn golden(state: &LearningState, action: GoldenAction) -> anyhow::Result<Value> {
    match action {
        GoldenAction::Export { output } => {
            let export = state.golden.export().await;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, serde_json::to_string_pretty(&export)?).await?;
                    info!(path = %path.display(), templates = export.templates.len(), "Golden templates exported");
                    Ok(json!({ "exported": export.templates.len(), "path": path }))
                }
                None => Ok(serde_json::to_value(&export)?),
            }
        }
        GoldenAction::Import { path, replace } => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let export: GoldenExport = serde_json::from_str(&raw)?;
            let imported = state.golden.import(export.templates, replace).await;
            Ok(json!({ "imported": imported, "total": state.golden.len().await }))
        }
    }
}

fn parse_context(entries: &[String]) -> Context {
    let mut context = Context::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((key, raw)) => {
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                context.insert(key.trim().to_string(), value);
            }
            None => warn!(entry = %entry, "Ignoring context entry without '='"),
        }
    }
    context
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
