use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use colored::*;
use tokio_util::sync::CancellationToken;

use missionctl_runtime::config::ConfigBundle;
use missionctl_runtime::plugin_host::PluginHost;
use missionctl_runtime::{dag, MissionOutcome, MissionRuntime};
use missionctl_store::Store;
use missionctl_types::{ErrorKind, MissionId};

mod cli_args;
mod config_loader;
mod providers;
mod tracing_setup;

use cli_args::{CliArgs, Commands};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_setup::setup_logging();
    let args = CliArgs::parse();

    match run(args).await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{} {}", "error:".bright_red(), err);
            std::process::ExitCode::from(2)
        }
    }
}

async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args
        .config
        .clone()
        .ok_or_else(|| anyhow!("--config <file> is required"))?;
    let config = config_loader::load(&config_path)?;

    match args.command {
        Commands::Validate { mission } => cmd_validate(&config, &mission),
        Commands::Run { mission, inputs } => {
            let store = open_store(&args.store, &config_path).await?;
            cmd_run(store, &config, &mission, inputs.into_iter().collect()).await
        }
        Commands::Resume { mission, mission_id } => {
            let store = open_store(&args.store, &config_path).await?;
            cmd_resume(store, &config, &mission, mission_id).await
        }
        Commands::Missions => {
            let store = open_store(&args.store, &config_path).await?;
            cmd_missions(store).await
        }
        Commands::Events { mission_id } => {
            let store = open_store(&args.store, &config_path).await?;
            cmd_events(store, &mission_id).await
        }
        Commands::Tasks { mission_id } => {
            let store = open_store(&args.store, &config_path).await?;
            cmd_tasks(store, &mission_id).await
        }
    }
}

async fn open_store(override_path: &Option<PathBuf>, config_path: &std::path::Path) -> Result<Store> {
    let path = match override_path {
        Some(p) => p.clone(),
        None => config_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("missionctl.db"),
    };
    Store::open(&path)
        .await
        .with_context(|| format!("opening store at {}", path.display()))
}

fn plugin_host() -> Arc<PluginHost> {
    let root = dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("missionctl")
        .join("plugins");
    Arc::new(PluginHost::new(root))
}

fn mission_def<'a>(
    config: &'a ConfigBundle,
    mission: &str,
) -> Result<&'a missionctl_runtime::config::MissionDef> {
    config
        .missions
        .get(mission)
        .ok_or_else(|| anyhow!("no mission named `{mission}` in configuration"))
}

fn cmd_validate(config: &ConfigBundle, mission: &str) -> Result<i32> {
    let definition = mission_def(config, mission)?;
    let known_agents: std::collections::HashSet<String> = config.agents.keys().cloned().collect();
    let known_datasets: std::collections::HashSet<String> = config.datasets.keys().cloned().collect();

    match dag::validate(definition, &known_agents, &known_datasets) {
        Ok(()) => {
            println!("{} mission `{mission}` is valid", "ok:".bright_green());
            Ok(0)
        }
        Err(err) => {
            let kind: ErrorKind = err.into();
            eprintln!("{} {kind}", "invalid:".bright_red());
            Ok(kind.exit_code())
        }
    }
}

async fn cmd_run(
    store: Store,
    config: &ConfigBundle,
    mission: &str,
    inputs: HashMap<String, String>,
) -> Result<i32> {
    let providers = providers::build_registry();
    let plugin_host = plugin_host();
    let cancel = install_ctrl_c_handler();

    let outcome = MissionRuntime::launch(store, providers, plugin_host, config, mission, inputs, cancel)
        .await;
    report_outcome(outcome)
}

async fn cmd_resume(store: Store, config: &ConfigBundle, mission: &str, mission_id: String) -> Result<i32> {
    let providers = providers::build_registry();
    let plugin_host = plugin_host();
    let cancel = install_ctrl_c_handler();

    let outcome = MissionRuntime::resume(
        store,
        providers,
        plugin_host,
        config,
        mission,
        MissionId(mission_id),
        cancel,
    )
    .await;
    report_outcome(outcome)
}

fn report_outcome(outcome: Result<MissionOutcome, missionctl_runtime::RuntimeError>) -> Result<i32> {
    use missionctl_types::MissionStatus;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            let kind: ErrorKind = err.into();
            eprintln!("{} {kind}", "error:".bright_red());
            return Ok(kind.exit_code());
        }
    };

    println!("mission {} -> {:?}", outcome.mission_id, outcome.status);
    if let Some(reason) = &outcome.error {
        eprintln!("{} {reason}", "reason:".bright_yellow());
    }
    Ok(match outcome.status {
        MissionStatus::Completed => 0,
        MissionStatus::Cancelled => 3,
        _ => 2,
    })
}

async fn cmd_missions(store: Store) -> Result<i32> {
    for (id, name, status) in store.list_missions().await? {
        println!("{id}  {name}  {status:?}");
    }
    Ok(0)
}

async fn cmd_events(store: Store, mission_id: &str) -> Result<i32> {
    for event in store.list_events(mission_id).await? {
        println!(
            "[{:>8}ms] {}{} {:?}",
            event.mission_relative_ms,
            event.task_name.as_deref().unwrap_or("-"),
            event.index.map(|i| format!("#{i}")).unwrap_or_default(),
            event.kind
        );
    }
    Ok(0)
}

async fn cmd_tasks(store: Store, mission_id: &str) -> Result<i32> {
    for task in store.list_all_tasks(mission_id).await? {
        let idx = task.index.map(|i| format!("#{i}")).unwrap_or_default();
        println!("{}{}  {}", task.name, idx, task.status.bright_cyan());
        if let Some(summary) = &task.summary {
            println!("  summary: {summary}");
        }
        if let Some(output) = &task.output {
            println!("  output:  {output}");
        }
        if let Some(error) = &task.error {
            println!("  {} {error}", "error:".bright_red());
        }
    }
    Ok(0)
}

fn install_ctrl_c_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    cancel
}
