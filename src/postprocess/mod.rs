// src/postprocess/mod.rs

//! Idempotent post-processing.
//!
//! After a successful compute step, a job may merge metric rollups into
//! aggregate tables and emit alerts. Both are keyed so that re-running them
//! for a run date converges on the same rows:
//!
//! - rollups upsert on their declared key columns;
//! - alerts are unique per `(run_date, entity_id, alert_type)` and are only
//!   inserted when absent.
//!
//! [`Warehouse`] is the store capability; [`sqlite::SqliteWarehouse`] is the
//! production implementation.

pub mod sqlite;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::config::model::{AlertSpec, JobConfig, RollupSpec};

pub use sqlite::{LazySqliteWarehouse, SqliteWarehouse};

/// One emitted alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub run_date: NaiveDate,
    pub entity_id: String,
    pub alert_type: String,
    pub job_id: String,
    pub detail: Option<String>,
}

/// Relational store used for counting and post-processing.
pub trait Warehouse: Send + Sync {
    /// Check that the store can be reached. Called as a pre-condition by
    /// jobs that use the warehouse.
    fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// Run a counting query. `:run_date` is bound when the query uses it.
    fn count(&self, query: &str, run_date: NaiveDate) -> Result<u64>;

    /// Merge the rows of `spec.query` into `spec.table`, keyed on
    /// `spec.key`. Returns the number of rows written.
    fn upsert_rollup(&self, spec: &RollupSpec, run_date: NaiveDate) -> Result<usize>;

    /// Emit one alert per entity returned by `spec.query`, skipping entities
    /// already alerted for this run date and alert type. Returns the number
    /// of newly emitted alerts.
    fn emit_alerts(&self, job_id: &str, spec: &AlertSpec, run_date: NaiveDate) -> Result<usize>;

    fn alerts_for(&self, run_date: NaiveDate) -> Result<Vec<AlertRecord>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessSummary {
    pub rollup_rows: usize,
    pub alerts_emitted: usize,
}

/// Runs a job's declared rollups and alerts against a warehouse.
pub struct PostProcessor<'a> {
    warehouse: &'a dyn Warehouse,
}

impl<'a> PostProcessor<'a> {
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn run(&self, job_id: &str, job: &JobConfig, run_date: NaiveDate) -> Result<PostProcessSummary> {
        let mut summary = PostProcessSummary::default();

        for rollup in job.rollup.iter() {
            let rows = self
                .warehouse
                .upsert_rollup(rollup, run_date)
                .with_context(|| format!("rollup into '{}'", rollup.table))?;
            summary.rollup_rows += rows;
        }

        for alert in job.alert.iter() {
            let emitted = self
                .warehouse
                .emit_alerts(job_id, alert, run_date)
                .with_context(|| format!("alerts of type '{}'", alert.alert_type))?;
            summary.alerts_emitted += emitted;
        }

        info!(
            job = %job_id,
            %run_date,
            rollup_rows = summary.rollup_rows,
            alerts_emitted = summary.alerts_emitted,
            "post-processing finished"
        );
        Ok(summary)
    }
}
