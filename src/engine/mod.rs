// src/engine/mod.rs

//! Orchestration engine for rungate.
//!
//! One generic [`LifecycleController`] drives every job: it asks the
//! dependency gate, claims the ledger row, runs pre-conditions, the source
//! check, the compute step and post-processing, and makes sure every path
//! after the claim ends in COMPLETED or FAILED.
//!
//! The controller lives in [`controller`]; the work done while a run is
//! claimed lives in [`stages`].

use chrono::NaiveDate;

use crate::failure::FailureReport;

pub mod controller;
pub mod stages;

pub use controller::{Components, ControllerOptions, LifecycleController};

/// Exit code of a completed run.
pub const SUCCESS_EXIT_CODE: i32 = 0;

/// Final result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        job_id: String,
        run_date: NaiveDate,
        records_processed: u64,
        /// False for the graceful empty-run path.
        compute_invoked: bool,
    },
    Failed(FailureReport),
}

impl RunOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } => SUCCESS_EXIT_CODE,
            RunOutcome::Failed(report) => report.exit_code(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match self {
            RunOutcome::Failed(report) => Some(report),
            RunOutcome::Completed { .. } => None,
        }
    }
}
