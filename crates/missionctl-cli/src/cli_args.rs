use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command line front-end for the missionctl mission runtime.
///
/// This binary is the thin presenter spec §1 carves out of the core: it
/// loads the declarative configuration surface (spec §6) from disk, opens
/// the durable store, and drives a [`missionctl_runtime::MissionRuntime`].
/// Concrete LLM-provider clients and tool plugins are registered by the
/// embedder -- see [`crate::providers::register`] -- since both are
/// external collaborators the core treats only at their interface.
#[derive(Parser, Debug)]
#[clap(name = "missionctl", about = "Run and inspect missionctl missions")]
pub struct CliArgs {
    /// Path to the declarative configuration bundle (TOML or JSON, spec §6).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Mission-store database file. Defaults to `<mission-root>/missionctl.db`
    /// next to the config file.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a mission definition: duplicate task names, unknown
    /// agent/dataset/dependency references, and DAG cycles (spec §8
    /// scenario 6). Exits 1 on a validation failure, 0 otherwise.
    Validate {
        /// Name of the mission within the config bundle to validate.
        mission: String,
    },
    /// Launch a fresh mission run and drive it to completion.
    Run {
        /// Name of the mission within the config bundle to run.
        mission: String,
        /// `key=value` mission input, repeatable.
        #[arg(long = "input", value_parser = parse_kv)]
        inputs: Vec<(String, String)>,
    },
    /// Resume a mission interrupted mid-flight (spec §4.9).
    Resume {
        /// Name of the mission within the config bundle (must match the
        /// definition the interrupted run used).
        mission: String,
        /// The mission ID to resume, as printed by `run`/`resume` or
        /// `missions`.
        mission_id: String,
    },
    /// List missions recorded in the store with their current status.
    Missions,
    /// Print the persisted event stream for a mission.
    Events {
        mission_id: String,
    },
    /// Print the final status/output/summary of every task instance for
    /// a mission.
    Tasks {
        mission_id: String,
    },
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) => Ok((k.to_string(), v.to_string())),
        None => Err(format!("expected `key=value`, got `{s}`")),
    }
}
