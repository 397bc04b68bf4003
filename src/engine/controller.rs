// src/engine/controller.rs

//! Lifecycle controller: one invocation of one job for one run date.
//!
//! ```text
//! gate ──unsatisfied──▶ FAIL (no ledger row, exit 1)
//!  │
//!  ▼
//! register (PENDING) ─▶ claim (RUNNING)
//!  │
//!  ▼
//! pre-conditions ─▶ source check ─▶ execute ─▶ post-process
//!  │ any failure                               │
//!  ▼                                           ▼
//! ledger FAILED, notify, exit ≠ 0        ledger COMPLETED, notify, exit 0
//! ```
//!
//! Once the row is claimed, every path ends in `complete` or `fail`,
//! including a panic inside a stage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::model::JobConfig;
use crate::dag::{DependencyGate, GateDecision};
use crate::engine::stages::{ClaimedOutcome, StageContext};
use crate::engine::RunOutcome;
use crate::exec::ComputeEngine;
use crate::failure::{classify, FailureKind, Stage, StageFailure};
use crate::fs::FileSystem;
use crate::ledger::RunLedger;
use crate::notify::{escalate, Notification, Notifier};
use crate::postprocess::Warehouse;

/// External collaborators injected into the controller.
#[derive(Clone)]
pub struct Components {
    pub ledger: Arc<dyn RunLedger>,
    pub engine: Arc<dyn ComputeEngine>,
    pub warehouse: Arc<dyn Warehouse>,
    pub notifier: Arc<dyn Notifier>,
    pub fs: Arc<dyn FileSystem>,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Upper bound for each reachability probe.
    pub connect_timeout: Duration,
    /// Upper bound for a `source_count.cmd` probe.
    pub source_count_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            source_count_timeout: Duration::from_secs(300),
        }
    }
}

pub struct LifecycleController {
    components: Components,
    options: ControllerOptions,
}

impl LifecycleController {
    pub fn new(components: Components, options: ControllerOptions) -> Self {
        Self {
            components,
            options,
        }
    }

    /// Drive one run of `job_id` for `run_date` to a terminal outcome.
    pub async fn run(&self, job_id: &str, job: &JobConfig, run_date: NaiveDate) -> RunOutcome {
        let job_name = job.display_name(job_id);
        info!(job = %job_id, %run_date, deps = ?job.after, "starting job invocation");

        // Dependency gate: nothing is written to the ledger before it passes.
        let gate = DependencyGate::new(self.components.ledger.as_ref());
        match gate.check(&job.after, run_date) {
            Ok(GateDecision::Satisfied) => {}
            Ok(decision @ GateDecision::Unsatisfied(_)) => {
                return self
                    .abort(
                        job_id,
                        run_date,
                        StageFailure::new(
                            Stage::Dependency,
                            FailureKind::DependencyUnsatisfied,
                            decision.describe(),
                        ),
                    )
                    .await;
            }
            Err(e) => {
                return self
                    .abort(
                        job_id,
                        run_date,
                        StageFailure::new(Stage::Dependency, FailureKind::StorageError, e.to_string()),
                    )
                    .await;
            }
        }

        let ledger = self.components.ledger.as_ref();
        let claimed = ledger
            .register(job_id, run_date, job_name)
            .and_then(|_| ledger.claim(job_id, run_date, job_name));
        if let Err(e) = claimed {
            return self
                .abort(
                    job_id,
                    run_date,
                    StageFailure::new(Stage::Claim, FailureKind::StorageError, e.to_string()),
                )
                .await;
        }
        info!(job = %job_id, %run_date, "run claimed");

        match self.run_claimed(job_id, job, run_date).await {
            Ok(outcome) => self.finish_success(job_id, run_date, outcome).await,
            Err(failure) => self.finish_failure(job_id, run_date, failure).await,
        }
    }

    /// Run the claimed stages on their own task so that a panic is caught
    /// and still ends the run as FAILED.
    async fn run_claimed(
        &self,
        job_id: &str,
        job: &JobConfig,
        run_date: NaiveDate,
    ) -> Result<ClaimedOutcome, StageFailure> {
        let current = Arc::new(Mutex::new(Stage::Precondition));
        let ctx = StageContext {
            job_id: job_id.to_string(),
            job: job.clone(),
            run_date,
            engine: Arc::clone(&self.components.engine),
            warehouse: Arc::clone(&self.components.warehouse),
            fs: Arc::clone(&self.components.fs),
            connect_timeout: self.options.connect_timeout,
            source_count_timeout: self.options.source_count_timeout,
            current: Arc::clone(&current),
        };

        match tokio::spawn(ctx.run()).await {
            Ok(result) => result,
            Err(join_err) => {
                let stage = current.lock().map(|s| *s).unwrap_or(Stage::Execute);
                let detail = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    join_err.to_string()
                };
                Err(StageFailure::unexpected(stage, detail))
            }
        }
    }

    /// Failure before the claim: report and notify, never touch the ledger.
    async fn abort(&self, job_id: &str, run_date: NaiveDate, failure: StageFailure) -> RunOutcome {
        let report = classify(job_id, run_date, failure);
        error!(
            job = %job_id,
            %run_date,
            stage = %report.stage,
            kind = %report.kind,
            exit_code = report.exit_code(),
            "{}", report.detail
        );
        escalate(self.components.notifier.as_ref(), &Notification::failure(&report)).await;
        RunOutcome::Failed(report)
    }

    /// Failure after the claim: ledger FAILED, notify, keep the original exit
    /// code even if the ledger write itself fails.
    async fn finish_failure(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        failure: StageFailure,
    ) -> RunOutcome {
        let report = classify(job_id, run_date, failure);
        error!(
            job = %job_id,
            %run_date,
            stage = %report.stage,
            kind = %report.kind,
            exit_code = report.exit_code(),
            "{}", report.detail
        );

        if let Err(e) = self
            .components
            .ledger
            .fail(job_id, run_date, &report.ledger_message())
        {
            error!(job = %job_id, %run_date, error = %e, "could not record failure in ledger");
            let storage = classify(
                job_id,
                run_date,
                StageFailure::new(Stage::Complete, FailureKind::StorageError, e.to_string()),
            );
            escalate(self.components.notifier.as_ref(), &Notification::failure(&storage)).await;
        }

        escalate(self.components.notifier.as_ref(), &Notification::failure(&report)).await;
        RunOutcome::Failed(report)
    }

    async fn finish_success(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        outcome: ClaimedOutcome,
    ) -> RunOutcome {
        let (records_processed, compute_invoked) = match outcome {
            ClaimedOutcome::EmptySource => (0, false),
            ClaimedOutcome::Processed { records_processed } => (records_processed, true),
        };

        if let Err(e) = self
            .components
            .ledger
            .complete(job_id, run_date, records_processed)
        {
            warn!(job = %job_id, %run_date, "run succeeded but the ledger could not record it");
            return self
                .abort(
                    job_id,
                    run_date,
                    StageFailure::new(Stage::Complete, FailureKind::StorageError, e.to_string()),
                )
                .await;
        }

        info!(
            job = %job_id,
            %run_date,
            records_processed,
            compute_invoked,
            "run completed"
        );
        escalate(
            self.components.notifier.as_ref(),
            &Notification::success(job_id, run_date, records_processed),
        )
        .await;

        RunOutcome::Completed {
            job_id: job_id.to_string(),
            run_date,
            records_processed,
            compute_invoked,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with non-string payload".to_string()
    }
}
