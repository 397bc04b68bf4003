// src/notify/mod.rs

//! Best-effort notification channel.
//!
//! Notifications are a side effect of a run, never part of its outcome: a
//! notifier that fails is logged and ignored, and the run keeps its original
//! exit code.
//!
//! - [`LogNotifier`] writes every notification to the log.
//! - [`command::CommandNotifier`] runs a configured shell command per
//!   notification.
//! - [`MultiNotifier`] fans a notification out to several notifiers.

pub mod command;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::config::model::NotifySection;
use crate::failure::FailureReport;
use crate::types::RunStatus;

pub use command::CommandNotifier;

/// What the outside world is told about a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub job_id: String,
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn success(job_id: &str, run_date: NaiveDate, records_processed: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_date,
            status: RunStatus::Completed,
            detail: format!("completed, {records_processed} records processed"),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(report: &FailureReport) -> Self {
        Self {
            job_id: report.job_id.clone(),
            run_date: report.run_date,
            status: RunStatus::Failed,
            detail: format!("[{}] {}", report.kind, report.ledger_message()),
            timestamp: report.timestamp,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.job_id, self.run_date, self.status, self.detail
        )
    }
}

pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Deliver a notification, swallowing (but logging) any transport failure.
pub async fn escalate(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification).await {
        warn!(
            job = %notification.job_id,
            run_date = %notification.run_date,
            error = %e,
            "notification delivery failed; continuing"
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(
        &'a self,
        n: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match n.status {
                RunStatus::Failed => error!(
                    job = %n.job_id,
                    run_date = %n.run_date,
                    status = %n.status,
                    "{}", n.detail
                ),
                _ => info!(
                    job = %n.job_id,
                    run_date = %n.run_date,
                    status = %n.status,
                    "{}", n.detail
                ),
            }
            Ok(())
        })
    }
}

/// Sends to every inner notifier; one failing does not stop the others.
#[derive(Default)]
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// The notifier stack described by `[notify]`: always the log, plus the
    /// command when one is configured.
    pub fn from_config(section: &NotifySection) -> Self {
        let multi = Self::new().with(LogNotifier);
        match section.cmd {
            Some(ref cmd) => multi.with(
                CommandNotifier::new(cmd.clone(), section.on_success)
                    .with_timeout(section.timeout()),
            ),
            None => multi,
        }
    }
}

impl Notifier for MultiNotifier {
    fn notify<'a>(
        &'a self,
        n: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for notifier in self.notifiers.iter() {
                if let Err(e) = notifier.notify(n).await {
                    failures.push(e.to_string());
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(failures.join("; ")))
            }
        })
    }
}
