use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::Deserialize;

/// Which calendar date a job's run logically covers, relative to the day it
/// is invoked.
///
/// - `Yesterday`: daily batch jobs that process the previous day (default).
/// - `Today`: same-day or continuously running jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunDatePolicy {
    Today,
    Yesterday,
}

impl Default for RunDatePolicy {
    fn default() -> Self {
        RunDatePolicy::Yesterday
    }
}

impl RunDatePolicy {
    /// Resolve the run date for an invocation happening on `today`.
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            RunDatePolicy::Today => today,
            RunDatePolicy::Yesterday => today.checked_sub_days(Days::new(1)).unwrap_or(today),
        }
    }
}

impl FromStr for RunDatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(RunDatePolicy::Today),
            "yesterday" => Ok(RunDatePolicy::Yesterday),
            other => Err(format!(
                "invalid run_date: {other} (expected \"today\" or \"yesterday\")"
            )),
        }
    }
}

/// Lifecycle status of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Render an optional status the way operators see it: missing rows print as
/// `NOT_FOUND`.
pub fn display_status(status: Option<RunStatus>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("NOT_FOUND")
}
