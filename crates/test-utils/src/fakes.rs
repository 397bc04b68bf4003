//! Test doubles for the controller's collaborators.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use rungate::exec::{ComputeEngine, ComputeInvocation};
use rungate::errors::Result;
use rungate::ledger::{LedgerError, LedgerResult, MemoryLedger, RunLedger, RunRecord};
use rungate::notify::{Notification, Notifier};
use rungate::types::RunStatus;

/// A fake compute engine that:
/// - records every invocation
/// - returns a scripted exit code without spawning anything.
#[derive(Clone)]
pub struct FakeEngine {
    exit_code: i32,
    invocations: Arc<Mutex<Vec<ComputeInvocation>>>,
}

impl FakeEngine {
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding() -> Self {
        Self::exiting_with(0)
    }

    pub fn invocations(&self) -> Vec<ComputeInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl ComputeEngine for FakeEngine {
    fn execute<'a>(
        &'a self,
        invocation: &'a ComputeInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        let invocations = Arc::clone(&self.invocations);
        let code = self.exit_code;
        Box::pin(async move {
            invocations.lock().unwrap().push(invocation.clone());
            Ok(code)
        })
    }
}

/// An engine whose compute step panics.
pub struct PanickingEngine;

impl ComputeEngine for PanickingEngine {
    fn execute<'a>(
        &'a self,
        _invocation: &'a ComputeInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> Result<i32> {
    panic!("engine exploded")
}

/// Records notifications; optionally fails every delivery afterwards.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail_delivery: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records, then reports a transport error.
    pub fn unreachable() -> Self {
        Self {
            sent: Arc::default(),
            fail_delivery: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<RunStatus> {
        self.sent().iter().map(|n| n.status).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail_delivery {
                anyhow::bail!("notification channel unreachable");
            }
            Ok(())
        })
    }
}

/// Which ledger operation a [`FlakyLedger`] refuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    StatusOf,
    Claim,
    Complete,
    Fail,
}

/// Wraps a [`MemoryLedger`] and reports one operation as unavailable.
pub struct FlakyLedger {
    pub inner: MemoryLedger,
    fail_on: FailOn,
}

impl FlakyLedger {
    pub fn new(fail_on: FailOn) -> Self {
        Self {
            inner: MemoryLedger::new(),
            fail_on,
        }
    }

    fn refuse(&self, op: FailOn) -> LedgerResult<()> {
        if self.fail_on == op {
            Err(LedgerError::Unavailable("connection reset by peer".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RunLedger for FlakyLedger {
    fn register(&self, job_id: &str, run_date: NaiveDate, job_name: &str) -> LedgerResult<RunRecord> {
        self.inner.register(job_id, run_date, job_name)
    }

    fn claim(&self, job_id: &str, run_date: NaiveDate, job_name: &str) -> LedgerResult<RunRecord> {
        self.refuse(FailOn::Claim)?;
        self.inner.claim(job_id, run_date, job_name)
    }

    fn complete(&self, job_id: &str, run_date: NaiveDate, records_processed: u64) -> LedgerResult<()> {
        self.refuse(FailOn::Complete)?;
        self.inner.complete(job_id, run_date, records_processed)
    }

    fn fail(&self, job_id: &str, run_date: NaiveDate, error_message: &str) -> LedgerResult<()> {
        self.refuse(FailOn::Fail)?;
        self.inner.fail(job_id, run_date, error_message)
    }

    fn status_of(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunStatus>> {
        self.refuse(FailOn::StatusOf)?;
        self.inner.status_of(job_id, run_date)
    }

    fn record(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunRecord>> {
        self.inner.record(job_id, run_date)
    }

    fn records_for(&self, run_date: NaiveDate) -> LedgerResult<Vec<RunRecord>> {
        self.inner.records_for(run_date)
    }
}
