// src/config/mod.rs

//! Configuration loading and validation for rungate.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`): one `[job.<id>]` record
//!   per scheduled job.
//! - Load a config file from disk (`loader.rs`).
//! - Validate invariants like dependency acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AlertSpec, ConfigFile, ConfigSection, JobConfig, NotifySection, Preconditions,
    RawConfigFile, RollupSpec, SourceCount,
};
