// src/notify/command.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::exec::process::{capture_stdout, shell_command};
use crate::types::RunStatus;

use super::{Notification, Notifier};

/// Runs a shell command for each notification.
///
/// The command receives the notification through `RUNGATE_NOTIFY_JOB_ID`,
/// `RUNGATE_NOTIFY_RUN_DATE`, `RUNGATE_NOTIFY_STATUS`,
/// `RUNGATE_NOTIFY_DETAIL` and `RUNGATE_NOTIFY_TIMESTAMP`.
///
/// A command still running after `timeout` is killed and reported as a
/// delivery failure.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    cmd: String,
    on_success: bool,
    timeout: Duration,
}

impl CommandNotifier {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(cmd: impl Into<String>, on_success: bool) -> Self {
        Self {
            cmd: cmd.into(),
            on_success,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Notifier for CommandNotifier {
    fn notify<'a>(
        &'a self,
        n: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if n.status == RunStatus::Completed && !self.on_success {
                debug!(job = %n.job_id, "skipping success notification command");
                return Ok(());
            }

            let mut cmd = shell_command(&self.cmd);
            cmd.env("RUNGATE_NOTIFY_JOB_ID", &n.job_id)
                .env("RUNGATE_NOTIFY_RUN_DATE", n.run_date.format("%Y-%m-%d").to_string())
                .env("RUNGATE_NOTIFY_STATUS", n.status.as_str())
                .env("RUNGATE_NOTIFY_DETAIL", &n.detail)
                .env("RUNGATE_NOTIFY_TIMESTAMP", n.timestamp.to_rfc3339());

            // Dropping the capture on timeout kills the child (kill_on_drop).
            tokio::time::timeout(self.timeout, capture_stdout("notify command", cmd))
                .await
                .map_err(|_| {
                    anyhow!(
                        "notify command did not finish within {}s",
                        self.timeout.as_secs_f32()
                    )
                })??;
            debug!(job = %n.job_id, status = %n.status, "notification command delivered");
            Ok(())
        })
    }
}
