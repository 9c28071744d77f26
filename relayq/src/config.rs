//! Locating and reading the relay configuration
//!
//! Precedence:
//! 1. `RELAYQ_CONFIG` environment variable
//! 2. `./relayq.config.ron` (current working directory)
//! 3. `/etc/relayq/relayq.config.ron` (system-wide config)

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::controller::Relay;

pub const CONFIG_ENV: &str = "RELAYQ_CONFIG";

#[must_use]
pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./relayq.config.ron"),
        PathBuf::from("/etc/relayq/relayq.config.ron"),
    ]
}

/// Find the configuration file from the environment and the default locations
///
/// # Errors
/// If `RELAYQ_CONFIG` names a missing file, or no default file exists.
pub fn find() -> anyhow::Result<PathBuf> {
    locate(
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        &default_paths(),
    )
}

/// An explicit path wins outright, even when it does not exist.
///
/// # Errors
/// If `explicit` names a missing file, or none of `defaults` exists.
pub fn locate(explicit: Option<PathBuf>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// # Errors
/// If the file cannot be read or is not a valid relay configuration.
pub fn load(path: &Path) -> anyhow::Result<Relay> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}
