// src/engine/stages.rs

//! The part of a run that happens while the ledger row is claimed:
//! pre-conditions, source check, compute step, post-processing.
//!
//! Everything here returns a [`StageFailure`] instead of touching the ledger;
//! recording the outcome is the controller's job.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::model::{JobConfig, SourceCount};
use crate::exec::process::capture_stdout;
use crate::exec::{ComputeEngine, ComputeInvocation};
use crate::failure::{FailureKind, Stage, StageFailure};
use crate::fs::FileSystem;
use crate::postprocess::{PostProcessor, Warehouse};
use crate::precheck::{describe, Missing, PreconditionChecker};

/// How the claimed part of a run ended when nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimedOutcome {
    /// Zero eligible input rows; the compute step was skipped.
    EmptySource,
    /// The compute step ran and post-processing finished.
    Processed { records_processed: u64 },
}

/// Owned inputs for the claimed stages, so they can run on their own task.
pub struct StageContext {
    pub job_id: String,
    pub job: JobConfig,
    pub run_date: NaiveDate,
    pub engine: Arc<dyn ComputeEngine>,
    pub warehouse: Arc<dyn Warehouse>,
    pub fs: Arc<dyn FileSystem>,
    pub connect_timeout: Duration,
    pub source_count_timeout: Duration,
    /// Last stage entered; read by the controller if this task panics.
    pub current: Arc<Mutex<Stage>>,
}

impl StageContext {
    fn enter(&self, stage: Stage) {
        if let Ok(mut current) = self.current.lock() {
            *current = stage;
        }
        debug!(job = %self.job_id, run_date = %self.run_date, %stage, "entering stage");
    }

    pub async fn run(self) -> Result<ClaimedOutcome, StageFailure> {
        self.enter(Stage::Precondition);
        let checker = PreconditionChecker::new(self.fs.as_ref(), self.connect_timeout);
        let mut missing = checker.check(&self.job.preconditions).await;
        if self.job.uses_warehouse() {
            if let Err(e) = self.warehouse.probe() {
                missing.push(Missing::Warehouse(format!("{e:#}")));
            }
        }
        if !missing.is_empty() {
            return Err(StageFailure::new(
                Stage::Precondition,
                FailureKind::PreconditionMissing,
                describe(&missing),
            ));
        }

        let invocation = ComputeInvocation::for_job(&self.job_id, &self.job, self.run_date);

        self.enter(Stage::SourceCheck);
        let source_rows = match self.job.source_count {
            Some(ref sc) => Some(self.count_source(sc, &invocation).await?),
            None => None,
        };
        if source_rows == Some(0) {
            info!(
                job = %self.job_id,
                run_date = %self.run_date,
                "no eligible input rows; completing without running the compute step"
            );
            return Ok(ClaimedOutcome::EmptySource);
        }

        self.enter(Stage::Execute);
        let code = self
            .engine
            .execute(&invocation)
            .await
            .map_err(|e| StageFailure::unexpected(Stage::Execute, e))?;
        if code != 0 {
            return Err(StageFailure::new(
                Stage::Execute,
                FailureKind::ComputeStepFailed { exit_code: code },
                format!("compute step failed with exit code {code}"),
            ));
        }

        self.enter(Stage::PostProcess);
        PostProcessor::new(self.warehouse.as_ref())
            .run(&self.job_id, &self.job, self.run_date)
            .map_err(|e| StageFailure::unexpected(Stage::PostProcess, format!("{e:#}")))?;

        let records_processed = match self.job.processed_count {
            Some(ref query) => self
                .warehouse
                .count(query, self.run_date)
                .map_err(|e| StageFailure::unexpected(Stage::PostProcess, format!("{e:#}")))?,
            None => source_rows.unwrap_or(0),
        };

        Ok(ClaimedOutcome::Processed { records_processed })
    }

    async fn count_source(
        &self,
        source: &SourceCount,
        invocation: &ComputeInvocation,
    ) -> Result<u64, StageFailure> {
        let count = match (&source.sql, &source.cmd) {
            (Some(query), _) => self
                .warehouse
                .count(query, self.run_date)
                .map_err(|e| StageFailure::unexpected(Stage::SourceCheck, format!("{e:#}")))?,
            (None, Some(cmd)) => {
                let probe = capture_stdout("source count", invocation.command(cmd));
                let out = tokio::time::timeout(self.source_count_timeout, probe)
                    .await
                    .map_err(|_| {
                        StageFailure::unexpected(
                            Stage::SourceCheck,
                            format!(
                                "source count command did not finish within {}s",
                                self.source_count_timeout.as_secs()
                            ),
                        )
                    })?
                    .map_err(|e| StageFailure::unexpected(Stage::SourceCheck, format!("{e:#}")))?;
                out.parse::<u64>().map_err(|_| {
                    StageFailure::unexpected(
                        Stage::SourceCheck,
                        format!("source count command printed '{out}', expected a non-negative integer"),
                    )
                })?
            }
            (None, None) => {
                return Err(StageFailure::unexpected(
                    Stage::SourceCheck,
                    "source_count has neither `sql` nor `cmd`",
                ));
            }
        };
        info!(job = %self.job_id, run_date = %self.run_date, source_rows = count, "source check");
        Ok(count)
    }
}
