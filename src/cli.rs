// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `rungate`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rungate",
    version,
    about = "Gate, run and record scheduled data jobs by (job, run date).",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$RUNGATE_CONFIG`, else `Rungate.toml` in the current
    /// working directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNGATE_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one job for one run date. Exits with the run's exit code.
    Run {
        job: String,
        /// Run date (YYYY-MM-DD); defaults to the job's `run_date` policy.
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Only evaluate the dependency gate. Exits 0 if the job may run.
    Check {
        job: String,
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Show ledger records for a run date (all jobs, or one job).
    Status {
        job: Option<String>,
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Validate the config and print jobs in dependency order; runs nothing.
    Plan,
    /// Delete log files older than the retention horizon.
    PruneLogs {
        /// Override `[config].log_retention_days`.
        #[arg(long, value_name = "DAYS")]
        days: Option<u32>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
