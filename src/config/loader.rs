// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a batch file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a batch file and validate it.
///
/// This is the entry point for the rest of the application. Durations,
/// regexes, writers and hook references are all checked here, so a
/// `ConfigFile` can be turned into a worker manager run without further
/// failure modes.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(
        path = ?path.as_ref(),
        tasks = config.tasks.len(),
        stop_conditions = config.stop_conditions.len(),
        "config loaded"
    );
    Ok(config)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Runpool.toml")
}
