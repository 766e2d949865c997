use std::time::Instant;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use agent_router::chat::run_chat;
use agent_router::cli::{
    AgentCommands, Cli, Commands, ServerCommands, TelemetryCommands, TodoCommands, command_label,
};
use agent_router::config::{RuntimeConfig, load_profiles, resolve_runtime_config};
use agent_router::doctor::run_doctor;
use agent_router::error::{categorize_error, format_cli_error};
use agent_router::pipeline::{Outcome, build_pipeline};
use agent_router::server::run_server;
use agent_router::streaming::{ChunkPrinter, print_outcome};
use agent_router::telemetry::{TelemetrySink, run_telemetry_report};
use agent_router::todos::{TodoFilter, TodoStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %format!("{err:#}"), "command failed");
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("error"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let label = command_label(&command);
    let telemetry = TelemetrySink::new(&cfg, label.clone());
    let started_at = Instant::now();
    let result = run_command(command, &cfg, &telemetry).await;
    let elapsed_ms = started_at.elapsed().as_millis();

    match &result {
        Ok(()) => telemetry.emit(
            "command.completed",
            json!({ "elapsed_ms": elapsed_ms }),
        ),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({
                "elapsed_ms": elapsed_ms,
                "category": categorize_error(err).code(),
                "error": format!("{err:#}"),
            }),
        ),
    }
    result
}

async fn run_command(command: Commands, cfg: &RuntimeConfig, telemetry: &TelemetrySink) -> Result<()> {
    match command {
        Commands::Ask { message } => {
            let (pipeline, _store) = build_pipeline(cfg, telemetry.clone())?;
            let message = message.join(" ");
            let mut printer = ChunkPrinter::new();
            let outcome = pipeline.run(&message, |chunk| printer.print(chunk)).await?;
            if matches!(outcome, Outcome::Conversational { .. }) {
                printer.finish();
            }
            print_outcome(&outcome);
        }
        Commands::Chat => {
            let (pipeline, store) = build_pipeline(cfg, telemetry.clone())?;
            run_chat(&pipeline, &store, telemetry).await?;
        }
        Commands::Plan { message } => {
            let (pipeline, _store) = build_pipeline(cfg, telemetry.clone())?;
            let plan = pipeline.plan(&message.join(" ")).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Doctor => run_doctor(cfg)?,
        Commands::Agents { command } => match command {
            AgentCommands::List => {
                let store = std::sync::Arc::new(TodoStore::from_template(&cfg.store_path));
                let registry = agent_router::agents::build_default_registry(store)?;
                let descriptors = registry.descriptors();
                println!("{}", serde_json::to_string_pretty(&descriptors)?);
            }
        },
        Commands::Todos { command } => match command {
            TodoCommands::List {
                status,
                priority,
                due_date,
            } => {
                let store = TodoStore::from_template(&cfg.store_path);
                let filter = TodoFilter {
                    status,
                    priority,
                    due_date,
                };
                agent_router::chat::print_todos(&store, &filter)?;
            }
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(cfg, path, limit)?,
        },
        Commands::Server { command } => match command {
            ServerCommands::Serve { host, port } => {
                run_server(cfg.clone(), host, port, telemetry).await?
            }
        },
    }

    Ok(())
}
