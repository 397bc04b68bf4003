// src/ledger/mod.rs

//! Run ledger: one durable record per `(job_id, run_date)`.
//!
//! The controller and the dependency gate only ever talk to a [`RunLedger`];
//! which store sits behind it is decided at startup.
//!
//! - [`memory`] keeps records in a process-local map (tests, dry runs).
//! - [`sqlite`] persists records in the `job_run_ledger` table.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::types::RunStatus;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The store could not be reached or refused the operation.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("no run record for job '{job_id}' on {run_date}")]
    NotFound { job_id: String, run_date: NaiveDate },

    #[error("run record for job '{job_id}' on {run_date} is {from}; cannot move to {to}")]
    InvalidTransition {
        job_id: String,
        run_date: NaiveDate,
        from: RunStatus,
        to: RunStatus,
    },
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub job_id: String,
    pub run_date: NaiveDate,
    pub job_name: String,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Only set once the run is COMPLETED.
    pub records_processed: Option<u64>,
    /// Only set once the run is FAILED.
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn pending(job_id: &str, run_date: NaiveDate, job_name: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_date,
            job_name: job_name.to_string(),
            status: RunStatus::Pending,
            start_time: None,
            end_time: None,
            records_processed: None,
            error_message: None,
        }
    }

    pub fn running(job_id: &str, run_date: NaiveDate, job_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Running,
            start_time: Some(now),
            ..Self::pending(job_id, run_date, job_name)
        }
    }
}

/// Storage capability for run records.
///
/// All operations are single-shot: implementations must not retry or block
/// waiting for another writer beyond the store's own lock timeout.
pub trait RunLedger: Send + Sync {
    /// Create the record as PENDING when absent. An existing record is
    /// returned untouched.
    fn register(&self, job_id: &str, run_date: NaiveDate, job_name: &str)
    -> LedgerResult<RunRecord>;

    /// Upsert the record to RUNNING with `start_time = now`.
    ///
    /// Last writer wins: an existing record is overwritten whatever its
    /// status, and its end time, count and error are cleared.
    fn claim(&self, job_id: &str, run_date: NaiveDate, job_name: &str) -> LedgerResult<RunRecord>;

    /// RUNNING -> COMPLETED.
    fn complete(&self, job_id: &str, run_date: NaiveDate, records_processed: u64)
    -> LedgerResult<()>;

    /// PENDING/RUNNING -> FAILED.
    fn fail(&self, job_id: &str, run_date: NaiveDate, error_message: &str) -> LedgerResult<()>;

    /// `None` means no run was ever registered for the key.
    fn status_of(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunStatus>>;

    fn record(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunRecord>>;

    /// All records for a run date, ordered by job id.
    fn records_for(&self, run_date: NaiveDate) -> LedgerResult<Vec<RunRecord>>;
}

/// Check that a record currently in `from` may move to the terminal `to`.
pub(crate) fn ensure_transition(
    job_id: &str,
    run_date: NaiveDate,
    from: RunStatus,
    to: RunStatus,
) -> LedgerResult<()> {
    let allowed = match to {
        RunStatus::Completed => from == RunStatus::Running,
        RunStatus::Failed => matches!(from, RunStatus::Running | RunStatus::Pending),
        RunStatus::Pending | RunStatus::Running => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            job_id: job_id.to_string(),
            run_date,
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn only_running_records_complete() {
        assert!(ensure_transition("a", day(), RunStatus::Running, RunStatus::Completed).is_ok());
        assert!(ensure_transition("a", day(), RunStatus::Pending, RunStatus::Completed).is_err());
        assert!(ensure_transition("a", day(), RunStatus::Completed, RunStatus::Completed).is_err());
    }

    #[test]
    fn failed_is_reachable_before_and_after_claim() {
        assert!(ensure_transition("a", day(), RunStatus::Pending, RunStatus::Failed).is_ok());
        assert!(ensure_transition("a", day(), RunStatus::Running, RunStatus::Failed).is_ok());
        let err = ensure_transition("a", day(), RunStatus::Completed, RunStatus::Failed).unwrap_err();
        assert!(err.to_string().contains("cannot move to FAILED"));
    }
}
