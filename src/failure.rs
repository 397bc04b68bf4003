// src/failure.rs

//! Failure taxonomy and classification.
//!
//! Every failure leaving the controller is a [`FailureReport`]: what kind of
//! failure it was, the lifecycle stage it happened in, a human readable
//! detail, and when. The report decides the process exit code and the
//! `error_message` written to the ledger.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Exit code for every failure that does not carry its own code.
pub const SENTINEL_EXIT_CODE: i32 = 1;

/// Lifecycle stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dependency,
    Claim,
    Precondition,
    SourceCheck,
    Execute,
    PostProcess,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dependency => "dependency",
            Stage::Claim => "claim",
            Stage::Precondition => "precondition",
            Stage::SourceCheck => "source check",
            Stage::Execute => "execute",
            Stage::PostProcess => "post-process",
            Stage::Complete => "complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    DependencyUnsatisfied,
    /// Credentials, files or downstream endpoints missing.
    PreconditionMissing,
    /// The compute step exited non-zero (or was killed).
    ComputeStepFailed { exit_code: i32 },
    /// The ledger could not be read or written.
    StorageError,
    UnexpectedError,
}

impl FailureKind {
    pub fn exit_code(&self) -> i32 {
        match *self {
            FailureKind::ComputeStepFailed { exit_code } if exit_code != 0 => exit_code,
            _ => SENTINEL_EXIT_CODE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DependencyUnsatisfied => "DependencyUnsatisfied",
            FailureKind::PreconditionMissing => "PreconditionMissing",
            FailureKind::ComputeStepFailed { .. } => "ComputeStepFailed",
            FailureKind::StorageError => "StorageError",
            FailureKind::UnexpectedError => "UnexpectedError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised inside a stage, before job/run-date context is attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage}: {detail}")]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub detail: String,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            detail: detail.into(),
        }
    }

    /// Any fault nobody classified more precisely.
    pub fn unexpected(stage: Stage, err: impl fmt::Display) -> Self {
        Self::new(
            stage,
            FailureKind::UnexpectedError,
            format!("Unexpected error: {err}"),
        )
    }
}

/// Fully classified failure, ready for the ledger and the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub job_id: String,
    pub run_date: NaiveDate,
    pub kind: FailureKind,
    pub stage: Stage,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl FailureReport {
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Text stored in the ledger's `error_message`.
    pub fn ledger_message(&self) -> String {
        format!("{}: {}", self.stage, self.detail)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] job '{}' for {} failed at {}: {}",
            self.kind, self.job_id, self.run_date, self.stage, self.detail
        )
    }
}

/// Attach job context and a timestamp to a stage failure.
pub fn classify(job_id: &str, run_date: NaiveDate, failure: StageFailure) -> FailureReport {
    FailureReport {
        job_id: job_id.to_string(),
        run_date,
        kind: failure.kind,
        stage: failure.stage,
        detail: failure.detail,
        timestamp: Utc::now(),
    }
}
