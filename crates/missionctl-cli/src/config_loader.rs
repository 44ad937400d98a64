//! Reads the declarative configuration bundle (spec §6) off disk.
//!
//! Resolving `${env}`/secret-store references and merging multiple files
//! is the external loader's job (spec §1); this is just "read one file,
//! parse it by extension" -- the minimum a binary needs to hand a
//! [`ConfigBundle`] to the runtime at all.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use missionctl_runtime::config::ConfigBundle;

pub fn load(path: &Path) -> Result<ConfigBundle> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => ConfigBundle::from_json_str(&contents)
            .with_context(|| format!("parsing {} as JSON", path.display())),
        Some("toml") | None => ConfigBundle::from_toml_str(&contents)
            .with_context(|| format!("parsing {} as TOML", path.display())),
        Some(other) => Err(anyhow!(
            "unsupported config extension `.{other}` (expected .toml or .json)"
        )),
    }
}
