// src/config/mod.rs

//! Batch files: worker manager settings, run options, stop conditions,
//! reporter formats and the tasks to run.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, ReporterSettings, RunSettings, TaskEntry};
