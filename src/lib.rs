// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod failure;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod postprocess;
pub mod precheck;
pub mod retention;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, JobConfig};
use crate::dag::{DependencyGate, GateDecision, JobGraph};
use crate::engine::{Components, ControllerOptions, LifecycleController};
use crate::exec::ShellEngine;
use crate::failure::{classify, FailureKind, Stage, StageFailure, SENTINEL_EXIT_CODE};
use crate::fs::RealFileSystem;
use crate::ledger::{RunLedger, RunRecord, SqliteLedger};
use crate::notify::{escalate, MultiNotifier, Notification};
use crate::postprocess::LazySqliteWarehouse;
use crate::types::display_status;

/// High-level entry point used by `main.rs`.
///
/// Loads and validates the config, then dispatches the subcommand. Returns
/// the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args.config_path();
    let cfg = load_and_validate(&config_path)?;
    debug!(path = ?config_path, jobs = cfg.job.len(), "config loaded");

    match args.command {
        Command::Run { job, date } => run_job(&cfg, &job, date).await,
        Command::Check { job, date } => check_job(&cfg, &job, date),
        Command::Status { job, date } => print_status(&cfg, job.as_deref(), date),
        Command::Plan => {
            print_plan(&cfg);
            Ok(0)
        }
        Command::PruneLogs { days } => prune_logs(&cfg, days),
    }
}

/// Run date for `job`: the explicit `--date`, else the job's policy applied
/// to today's local date.
pub fn resolve_run_date(job: &JobConfig, explicit: Option<NaiveDate>) -> NaiveDate {
    explicit.unwrap_or_else(|| job.run_date.resolve(Local::now().date_naive()))
}

async fn run_job(cfg: &ConfigFile, job_id: &str, date: Option<NaiveDate>) -> Result<i32> {
    let job = cfg.job(job_id)?;
    let run_date = resolve_run_date(job, date);
    let notifier = Arc::new(MultiNotifier::from_config(&cfg.notify));

    // The ledger being unreachable is fatal: nothing can be recorded, so the
    // only channels left are the notifier and the exit code.
    let ledger = match SqliteLedger::open(&cfg.config.ledger_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            let report = classify(
                job_id,
                run_date,
                StageFailure::new(Stage::Claim, FailureKind::StorageError, e.to_string()),
            );
            escalate(notifier.as_ref(), &Notification::failure(&report)).await;
            return Ok(report.exit_code());
        }
    };
    let components = Components {
        ledger: Arc::new(ledger),
        engine: Arc::new(ShellEngine),
        warehouse: Arc::new(LazySqliteWarehouse::new(
            cfg.config.effective_warehouse_path(),
        )),
        notifier,
        fs: Arc::new(RealFileSystem),
    };
    let options = ControllerOptions {
        connect_timeout: Duration::from_secs(cfg.config.connect_timeout_secs),
        source_count_timeout: Duration::from_secs(cfg.config.source_count_timeout_secs),
    };

    let outcome = LifecycleController::new(components, options)
        .run(job_id, job, run_date)
        .await;
    Ok(outcome.exit_code())
}

fn check_job(cfg: &ConfigFile, job_id: &str, date: Option<NaiveDate>) -> Result<i32> {
    let job = cfg.job(job_id)?;
    let run_date = resolve_run_date(job, date);
    let ledger = SqliteLedger::open(&cfg.config.ledger_path)?;

    let decision = DependencyGate::new(&ledger).check(&job.after, run_date)?;
    match decision {
        GateDecision::Satisfied => {
            println!("{job_id} {run_date}: dependencies satisfied");
            Ok(0)
        }
        GateDecision::Unsatisfied(_) => {
            println!("{job_id} {run_date}: blocked ({})", decision.describe());
            Ok(SENTINEL_EXIT_CODE)
        }
    }
}

fn print_status(cfg: &ConfigFile, job_id: Option<&str>, date: Option<NaiveDate>) -> Result<i32> {
    let ledger = SqliteLedger::open(&cfg.config.ledger_path)?;

    match job_id {
        Some(job_id) => {
            let job = cfg.job(job_id)?;
            let run_date = resolve_run_date(job, date);
            match ledger.record(job_id, run_date)? {
                Some(record) => print_record(&record),
                None => println!("{job_id} {run_date} {}", display_status(None)),
            }
        }
        None => {
            let run_date = date.unwrap_or_else(|| {
                crate::types::RunDatePolicy::default().resolve(Local::now().date_naive())
            });
            let records = ledger.records_for(run_date)?;
            if records.is_empty() {
                println!("no runs recorded for {run_date}");
            }
            for record in records.iter() {
                print_record(record);
            }
        }
    }
    Ok(0)
}

fn print_record(record: &RunRecord) {
    let mut line = format!("{} {} {}", record.job_id, record.run_date, record.status);
    if let Some(start) = record.start_time {
        line.push_str(&format!(" started={}", start.to_rfc3339()));
    }
    if let Some(end) = record.end_time {
        line.push_str(&format!(" ended={}", end.to_rfc3339()));
    }
    if let Some(n) = record.records_processed {
        line.push_str(&format!(" records={n}"));
    }
    if let Some(ref msg) = record.error_message {
        line.push_str(&format!(" error=\"{msg}\""));
    }
    println!("{line}");
}

/// Print jobs in an order that respects `after`, with what each one does.
fn print_plan(cfg: &ConfigFile) {
    let graph = JobGraph::from_config(cfg);
    let order = graph
        .execution_order()
        .unwrap_or_else(|| graph.jobs().collect());

    println!("rungate plan");
    println!("  config.ledger_path = {:?}", cfg.config.ledger_path);
    println!(
        "  config.warehouse_path = {:?}",
        cfg.config.effective_warehouse_path()
    );
    println!();

    println!("roots: {:?}", graph.roots());
    println!("jobs ({}):", cfg.job.len());
    for id in order {
        let Some(job) = cfg.job.get(id) else {
            continue;
        };
        println!("  - {id} ({})", job.display_name(id));
        println!("      cmd: {}", job.cmd);
        println!("      run_date: {:?}", job.run_date);
        let dependencies = graph.dependencies_of(id);
        if !dependencies.is_empty() {
            println!("      after: {:?}", dependencies);
        }
        let dependents = graph.dependents_of(id);
        if !dependents.is_empty() {
            println!("      unblocks: {:?}", dependents);
        }
        if !job.preconditions.is_empty() {
            println!("      preconditions: {:?}", job.preconditions);
        }
        if let Some(ref sc) = job.source_count {
            println!("      source_count: {:?}", sc);
        }
        for rollup in job.rollup.iter() {
            println!("      rollup: {} key={:?}", rollup.table, rollup.key);
        }
        for alert in job.alert.iter() {
            println!("      alert: {}", alert.alert_type);
        }
    }

    debug!("plan complete (no execution)");
}

fn prune_logs(cfg: &ConfigFile, days: Option<u32>) -> Result<i32> {
    let days = days.unwrap_or(cfg.config.log_retention_days);
    let removed = retention::prune_older_than(
        &RealFileSystem,
        &cfg.config.log_dir,
        retention::days(days),
        SystemTime::now(),
    )?;
    info!(removed = removed.len(), days, "pruned old logs");
    for path in removed.iter() {
        println!("removed {}", path.display());
    }
    Ok(0)
}
