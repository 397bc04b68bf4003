// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::RunDatePolicy;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// ledger_path = ".rungate/ledger.db"
/// warehouse_path = "warehouse.db"
///
/// [notify]
/// cmd = "notify-ops.sh"
///
/// [job.ingest]
/// cmd = "spark-submit ingest.jar --date {run_date}"
///
/// [job.fraud_scoring]
/// cmd = "spark-submit fraud.jar --date {run_date}"
/// after = ["ingest"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub notify: NotifySection,

    /// All jobs from `[job.<id>]`, keyed by job identifier.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// A validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub notify: NotifySection,
    pub job: BTreeMap<String, JobConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        notify: NotifySection,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self {
            config,
            notify,
            job,
        }
    }

    pub fn job(&self, job_id: &str) -> crate::errors::Result<&JobConfig> {
        self.job
            .get(job_id)
            .ok_or_else(|| crate::errors::RungateError::JobNotFound(job_id.to_string()))
    }
}

/// `[config]` section: where state lives and housekeeping knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// SQLite file holding the run ledger. `":memory:"` keeps it in memory.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    /// SQLite file holding source tables and post-processing outputs.
    ///
    /// Defaults to the ledger database.
    #[serde(default)]
    pub warehouse_path: Option<PathBuf>,

    /// Directory swept by `prune-logs`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    /// Upper bound for a single reachability probe.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upper bound for a `source_count.cmd` probe.
    #[serde(default = "default_source_count_timeout_secs")]
    pub source_count_timeout_secs: u64,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".rungate/ledger.db")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_source_count_timeout_secs() -> u64 {
    300
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            warehouse_path: None,
            log_dir: default_log_dir(),
            log_retention_days: default_log_retention_days(),
            connect_timeout_secs: default_connect_timeout_secs(),
            source_count_timeout_secs: default_source_count_timeout_secs(),
        }
    }
}

impl ConfigSection {
    pub fn effective_warehouse_path(&self) -> PathBuf {
        self.warehouse_path
            .clone()
            .unwrap_or_else(|| self.ledger_path.clone())
    }
}

/// `[notify]` section.
///
/// Notifications are always logged; `cmd` additionally runs a shell command
/// per notification with `RUNGATE_NOTIFY_*` variables set.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub cmd: Option<String>,

    /// Also notify on successful runs, not only failures.
    #[serde(default = "default_true")]
    pub on_success: bool,

    /// Upper bound for one run of `cmd`; a hung hook is killed after this.
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_notify_timeout_secs() -> u64 {
    30
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            cmd: None,
            on_success: default_true(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl NotifySection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[job.<id>]` section: the declarative replacement for a per-job wrapper
/// script.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Human readable label stored alongside ledger rows.
    #[serde(default)]
    pub name: Option<String>,

    /// The compute step. `{job_id}`, `{run_date}`, `{source}` and `{target}`
    /// are substituted before execution.
    pub cmd: String,

    #[serde(default)]
    pub run_date: RunDatePolicy,

    /// Jobs that must be COMPLETED for the same run date.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    /// Opaque key/value parameters handed to the compute step.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub preconditions: Preconditions,

    /// How to count eligible input rows. Without it the compute step always
    /// runs.
    #[serde(default)]
    pub source_count: Option<SourceCount>,

    /// Query counting rows processed for the run date, reported on
    /// completion. Falls back to the source count.
    #[serde(default)]
    pub processed_count: Option<String>,

    #[serde(default)]
    pub rollup: Vec<RollupSpec>,

    #[serde(default)]
    pub alert: Vec<AlertSpec>,
}

impl JobConfig {
    pub fn display_name<'a>(&'a self, job_id: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(job_id)
    }

    /// Whether any step of this job queries or writes the warehouse.
    pub fn uses_warehouse(&self) -> bool {
        self.source_count
            .as_ref()
            .is_some_and(|sc| sc.sql.is_some())
            || self.processed_count.is_some()
            || !self.rollup.is_empty()
            || !self.alert.is_empty()
    }
}

/// `[job.<id>.preconditions]`: things that must hold before the compute step.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct Preconditions {
    /// Environment variables that must be set and non-empty (credentials).
    #[serde(default)]
    pub env: Vec<String>,

    /// Files that must exist (config files, keytabs, input markers).
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// `host:port` endpoints that must accept a TCP connection.
    #[serde(default)]
    pub reachable: Vec<String>,
}

impl Preconditions {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.files.is_empty() && self.reachable.is_empty()
    }
}

/// `[job.<id>.source_count]`: exactly one of `sql` or `cmd`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceCount {
    /// Counting query run against the warehouse; `:run_date` is bound.
    #[serde(default)]
    pub sql: Option<String>,

    /// Shell command printing a single integer on stdout.
    #[serde(default)]
    pub cmd: Option<String>,
}

/// `[[job.<id>.rollup]]`: merge query rows into an aggregate table keyed by
/// `key`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RollupSpec {
    pub table: String,
    pub key: Vec<String>,
    pub query: String,
}

/// `[[job.<id>.alert]]`: emit one alert per entity returned by `query`
/// (columns: entity id, optional detail).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AlertSpec {
    pub alert_type: String,
    pub query: String,
}
