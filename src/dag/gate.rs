// src/dag/gate.rs

//! Dependency gate: may a job start for a given run date?

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use tracing::debug;

use crate::ledger::{LedgerResult, RunLedger};
use crate::types::{display_status, RunStatus};

/// A dependency that blocked the gate, with what the ledger showed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedDependency {
    pub job_id: String,
    /// `None` when no run was ever registered for the run date.
    pub observed: Option<RunStatus>,
}

impl fmt::Display for UnsatisfiedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is {}", self.job_id, display_status(self.observed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Satisfied,
    /// Every blocking dependency, ordered by job id.
    Unsatisfied(Vec<UnsatisfiedDependency>),
}

impl GateDecision {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, GateDecision::Satisfied)
    }

    /// One-line summary used in failure reports.
    pub fn describe(&self) -> String {
        match self {
            GateDecision::Satisfied => "all dependencies completed".to_string(),
            GateDecision::Unsatisfied(blocked) => blocked
                .iter()
                .map(|d| format!("{d}, not COMPLETED"))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Read-only view over the ledger for dependency checks.
///
/// The gate never waits or polls: one lookup per dependency, then a verdict.
/// Retrying later is the scheduler's business.
pub struct DependencyGate<'a> {
    ledger: &'a dyn RunLedger,
}

impl<'a> DependencyGate<'a> {
    pub fn new(ledger: &'a dyn RunLedger) -> Self {
        Self { ledger }
    }

    /// Every dependency must read exactly COMPLETED for `run_date`.
    pub fn check<I, S>(&self, dependencies: I, run_date: NaiveDate) -> LedgerResult<GateDecision>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deps: BTreeSet<String> = dependencies
            .into_iter()
            .map(|d| d.as_ref().to_string())
            .collect();

        let mut blocked = Vec::new();
        for dep in deps {
            let observed = self.ledger.status_of(&dep, run_date)?;
            debug!(
                dep = %dep,
                %run_date,
                status = display_status(observed),
                "checked dependency"
            );
            if observed != Some(RunStatus::Completed) {
                blocked.push(UnsatisfiedDependency {
                    job_id: dep,
                    observed,
                });
            }
        }

        if blocked.is_empty() {
            Ok(GateDecision::Satisfied)
        } else {
            Ok(GateDecision::Unsatisfied(blocked))
        }
    }
}
