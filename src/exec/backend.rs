// src/exec/backend.rs

//! Pluggable compute engine abstraction.
//!
//! The controller talks to a [`ComputeEngine`] instead of spawning processes
//! itself. Production uses [`ShellEngine`]; tests substitute an engine that
//! records invocations and returns a scripted exit code.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDate;
use tracing::info;

use crate::config::model::JobConfig;
use crate::errors::Result;

use super::process::{run_streaming, shell_command};

/// Everything the compute step is told about the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeInvocation {
    pub job_id: String,
    pub run_date: NaiveDate,
    /// Command template from the job definition.
    pub cmd: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl ComputeInvocation {
    pub fn for_job(job_id: &str, job: &JobConfig, run_date: NaiveDate) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_date,
            cmd: job.cmd.clone(),
            source: job.source.clone(),
            target: job.target.clone(),
            params: job.params.clone(),
        }
    }

    /// Substitute `{job_id}`, `{run_date}`, `{source}` and `{target}` in a
    /// command template.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{job_id}", &self.job_id)
            .replace("{run_date}", &self.run_date.format("%Y-%m-%d").to_string())
            .replace("{source}", self.source.as_deref().unwrap_or(""))
            .replace("{target}", self.target.as_deref().unwrap_or(""))
    }

    /// Environment handed to every process spawned for this run.
    ///
    /// Params are exported as `RUNGATE_PARAM_<KEY>` with the key upper-cased.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("RUNGATE_JOB_ID".to_string(), self.job_id.clone()),
            (
                "RUNGATE_RUN_DATE".to_string(),
                self.run_date.format("%Y-%m-%d").to_string(),
            ),
        ];
        if let Some(ref source) = self.source {
            env.push(("RUNGATE_SOURCE".to_string(), source.clone()));
        }
        if let Some(ref target) = self.target {
            env.push(("RUNGATE_TARGET".to_string(), target.clone()));
        }
        for (key, value) in self.params.iter() {
            env.push((
                format!("RUNGATE_PARAM_{}", key.to_uppercase().replace('-', "_")),
                value.clone(),
            ));
        }
        env
    }

    /// A shell command for `template` with this run's environment applied.
    pub fn command(&self, template: &str) -> tokio::process::Command {
        let mut cmd = shell_command(&self.render(template));
        cmd.envs(self.env());
        cmd
    }
}

/// Trait abstracting how the compute step is executed.
///
/// The returned value is the step's exit code; `Err` is reserved for failing
/// to run the step at all.
pub trait ComputeEngine: Send + Sync {
    fn execute<'a>(
        &'a self,
        invocation: &'a ComputeInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>>;
}

/// Runs the job's `cmd` through the platform shell and waits for it.
///
/// There is no timeout: cancelling a long compute step is up to whoever
/// owns the process (the scheduler killing it shows up as a signal exit).
#[derive(Debug, Clone, Default)]
pub struct ShellEngine;

impl ComputeEngine for ShellEngine {
    fn execute<'a>(
        &'a self,
        invocation: &'a ComputeInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<i32>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                job = %invocation.job_id,
                run_date = %invocation.run_date,
                cmd = %invocation.render(&invocation.cmd),
                "starting compute step"
            );
            let code = run_streaming(&invocation.job_id, invocation.command(&invocation.cmd)).await?;
            info!(
                job = %invocation.job_id,
                exit_code = code,
                success = code == 0,
                "compute step exited"
            );
            Ok(code)
        })
    }
}
