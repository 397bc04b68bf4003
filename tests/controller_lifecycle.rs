// tests/controller_lifecycle.rs

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::NaiveDate;
use rungate::config::JobConfig;
use rungate::engine::{Components, ControllerOptions, LifecycleController, RunOutcome};
use rungate::failure::{FailureKind, Stage};
use rungate::fs::mock::MockFileSystem;
use rungate::exec::ComputeEngine;
use rungate::ledger::{MemoryLedger, RunLedger, RunRecord};
use rungate::postprocess::SqliteWarehouse;
use rungate::types::RunStatus;
use rungate_test_utils::builders::JobConfigBuilder;
use rungate_test_utils::fakes::{
    FailOn, FakeEngine, FlakyLedger, PanickingEngine, RecordingNotifier,
};
use rungate_test_utils::{date, init_tracing, with_timeout};

fn run_date() -> NaiveDate {
    date(2024, 7, 1)
}

struct Harness {
    ledger: Arc<dyn RunLedger>,
    engine: Arc<dyn ComputeEngine>,
    notifier: RecordingNotifier,
    warehouse: Arc<SqliteWarehouse>,
    fs: Arc<MockFileSystem>,
}

impl Harness {
    fn new(ledger: Arc<dyn RunLedger>, engine: Arc<dyn ComputeEngine>) -> Self {
        init_tracing();
        let warehouse = SqliteWarehouse::open(":memory:").unwrap();
        warehouse
            .with_connection(|c| {
                c.execute_batch(
                    "CREATE TABLE transactions (txn_id INTEGER, account_id TEXT, amount REAL, run_date TEXT);
                     INSERT INTO transactions VALUES
                         (1, 'acc-1', 9500.0, '2024-07-01'),
                         (2, 'acc-1', 12.5,   '2024-07-01'),
                         (3, 'acc-2', 80.0,   '2024-07-01');
                     CREATE TABLE daily_totals (run_date TEXT, account_id TEXT, total REAL);",
                )
            })
            .unwrap();

        Self {
            ledger,
            engine,
            notifier: RecordingNotifier::new(),
            warehouse: Arc::new(warehouse),
            fs: Arc::new(MockFileSystem::new()),
        }
    }

    fn with_notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    fn controller(&self) -> LifecycleController {
        self.controller_with(ControllerOptions::default())
    }

    fn controller_with(&self, options: ControllerOptions) -> LifecycleController {
        LifecycleController::new(
            Components {
                ledger: Arc::clone(&self.ledger),
                engine: Arc::clone(&self.engine),
                warehouse: self.warehouse.clone(),
                notifier: Arc::new(self.notifier.clone()),
                fs: self.fs.clone(),
            },
            options,
        )
    }

    async fn run(&self, job_id: &str, job: &JobConfig) -> RunOutcome {
        with_timeout(self.controller().run(job_id, job, run_date())).await
    }
}

fn seed(ledger: &MemoryLedger, job_id: &str, status: RunStatus) {
    let mut record = RunRecord::pending(job_id, run_date(), job_id);
    record.status = status;
    ledger.insert(record).unwrap();
}

#[tokio::test]
async fn completed_dependency_lets_the_job_run_to_completion() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger, "ingest", RunStatus::Completed);
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score --date {run_date}")
        .after("ingest")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.is_completed());
    assert_eq!(engine.invocations().len(), 1);
    assert_eq!(
        ledger.status_of("fraud_scoring", run_date()).unwrap(),
        Some(RunStatus::Completed)
    );
    assert_eq!(h.notifier.statuses(), vec![RunStatus::Completed]);
}

#[tokio::test]
async fn missing_dependency_aborts_without_a_ledger_row() {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score").after("ingest").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 1);
    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::DependencyUnsatisfied);
    assert_eq!(report.stage, Stage::Dependency);
    assert!(report.detail.contains("ingest is NOT_FOUND"));

    assert_eq!(ledger.status_of("fraud_scoring", run_date()).unwrap(), None);
    assert!(ledger.is_empty());
    assert!(engine.invocations().is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, RunStatus::Failed);
    assert!(sent[0].detail.contains("ingest"));
}

#[tokio::test]
async fn every_unsatisfied_dependency_is_reported() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&ledger, "ingest", RunStatus::Completed);
    seed(&ledger, "enrich", RunStatus::Running);
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::succeeding()));

    let job = JobConfigBuilder::new("score")
        .after("ingest")
        .after("enrich")
        .after("geo")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    let detail = &outcome.failure().unwrap().detail;
    assert!(detail.contains("enrich is RUNNING"));
    assert!(detail.contains("geo is NOT_FOUND"));
    assert!(!detail.contains("ingest"));
}

#[tokio::test]
async fn empty_source_completes_without_invoking_compute() {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score")
        .source_count_sql("SELECT COUNT(*) FROM transactions WHERE run_date = :run_date AND amount > 1000000")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(
        outcome,
        RunOutcome::Completed {
            job_id: "fraud_scoring".to_string(),
            run_date: run_date(),
            records_processed: 0,
            compute_invoked: false,
        }
    );
    assert!(engine.invocations().is_empty());

    let record = ledger.record("fraud_scoring", run_date()).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.records_processed, Some(0));
}

#[tokio::test]
async fn records_processed_falls_back_to_source_rows() {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score")
        .source_count_sql("SELECT COUNT(*) FROM transactions WHERE run_date = :run_date")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert!(matches!(
        outcome,
        RunOutcome::Completed { records_processed: 3, compute_invoked: true, .. }
    ));
    let record = ledger.record("fraud_scoring", run_date()).unwrap().unwrap();
    assert_eq!(record.records_processed, Some(3));
}

#[tokio::test]
async fn compute_exit_code_propagates_and_run_is_failed() {
    let ledger = Arc::new(MemoryLedger::new());
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::exiting_with(143)));

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 143);
    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::ComputeStepFailed { exit_code: 143 });

    let record = ledger.record("fraud_scoring", run_date()).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    let message = record.error_message.unwrap();
    assert!(message.starts_with("execute"));
    assert!(message.contains("143"));
    assert_eq!(h.notifier.statuses(), vec![RunStatus::Failed]);
}

#[tokio::test]
async fn missing_precondition_fails_before_compute() {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));
    h.fs.add_file("/etc/rungate/present.key", SystemTime::now());

    let job = JobConfigBuilder::new("score")
        .require_env("RUNGATE_TEST_CREDENTIAL_THAT_IS_NEVER_SET")
        .require_file("/etc/rungate/present.key")
        .require_file("/etc/rungate/absent.key")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 1);
    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::PreconditionMissing);
    assert!(report.detail.contains("RUNGATE_TEST_CREDENTIAL_THAT_IS_NEVER_SET"));
    assert!(report.detail.contains("absent.key"));
    assert!(!report.detail.contains("present.key"));
    assert!(engine.invocations().is_empty());

    assert_eq!(
        ledger.status_of("fraud_scoring", run_date()).unwrap(),
        Some(RunStatus::Failed)
    );
}

#[tokio::test]
async fn notifier_outage_does_not_change_the_outcome() {
    let ledger = Arc::new(MemoryLedger::new());
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::exiting_with(3)))
        .with_notifier(RecordingNotifier::unreachable());

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(
        ledger.status_of("fraud_scoring", run_date()).unwrap(),
        Some(RunStatus::Failed)
    );
}

#[tokio::test]
async fn panic_in_compute_still_marks_the_run_failed() {
    let ledger = Arc::new(MemoryLedger::new());
    let h = Harness::new(ledger.clone(), Arc::new(PanickingEngine));

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 1);
    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::UnexpectedError);
    assert_eq!(report.stage, Stage::Execute);
    assert!(report.detail.contains("engine exploded"));

    let record = ledger.record("fraud_scoring", run_date()).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.error_message.unwrap().contains("Unexpected error"));
}

#[tokio::test]
async fn post_processing_error_is_unexpected_and_failed() {
    let ledger = Arc::new(MemoryLedger::new());
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::succeeding()));

    let job = JobConfigBuilder::new("score")
        .alert("HIGH_VALUE", "SELECT account_id FROM no_such_table")
        .build();
    let outcome = h.run("fraud_scoring", &job).await;

    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::UnexpectedError);
    assert_eq!(report.stage, Stage::PostProcess);
    assert_eq!(
        ledger.status_of("fraud_scoring", run_date()).unwrap(),
        Some(RunStatus::Failed)
    );
}

#[tokio::test]
async fn rerun_after_failure_reclaims_and_completes() {
    let ledger = Arc::new(MemoryLedger::new());
    let job = JobConfigBuilder::new("score").build();

    let failing = Harness::new(ledger.clone(), Arc::new(FakeEngine::exiting_with(2)));
    assert_eq!(failing.run("fraud_scoring", &job).await.exit_code(), 2);

    let passing = Harness::new(ledger.clone(), Arc::new(FakeEngine::succeeding()));
    assert_eq!(passing.run("fraud_scoring", &job).await.exit_code(), 0);

    let record = ledger.record("fraud_scoring", run_date()).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.error_message, None);
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn ledger_outage_at_gate_is_a_storage_error() {
    let ledger = Arc::new(FlakyLedger::new(FailOn::StatusOf));
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score").after("ingest").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.failure().unwrap().kind, FailureKind::StorageError);
    assert!(engine.invocations().is_empty());
    assert!(ledger.inner.is_empty());
}

#[tokio::test]
async fn ledger_outage_at_claim_never_runs_compute() {
    let ledger = Arc::new(FlakyLedger::new(FailOn::Claim));
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::StorageError);
    assert_eq!(report.stage, Stage::Claim);
    assert!(engine.invocations().is_empty());
}

#[tokio::test]
async fn ledger_outage_on_fail_keeps_original_exit_code() {
    let ledger = Arc::new(FlakyLedger::new(FailOn::Fail));
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::exiting_with(7)));

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 7);
    // One notification for the storage problem, one for the run itself.
    assert_eq!(
        h.notifier.statuses(),
        vec![RunStatus::Failed, RunStatus::Failed]
    );
    assert!(h.notifier.sent()[0].detail.starts_with("[StorageError]"));
}

#[tokio::test]
async fn ledger_outage_on_complete_is_a_storage_error() {
    let ledger = Arc::new(FlakyLedger::new(FailOn::Complete));
    let h = Harness::new(ledger.clone(), Arc::new(FakeEngine::succeeding()));

    let job = JobConfigBuilder::new("score").build();
    let outcome = h.run("fraud_scoring", &job).await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.failure().unwrap().kind, FailureKind::StorageError);
    assert_eq!(h.notifier.statuses(), vec![RunStatus::Failed]);
}

#[cfg(unix)]
#[tokio::test]
async fn hung_source_count_command_is_cut_off() {
    let ledger = Arc::new(MemoryLedger::new());
    let engine = FakeEngine::succeeding();
    let h = Harness::new(ledger.clone(), Arc::new(engine.clone()));

    let job = JobConfigBuilder::new("score").source_count_cmd("sleep 30").build();
    let options = ControllerOptions {
        source_count_timeout: Duration::from_millis(300),
        ..ControllerOptions::default()
    };
    let outcome = with_timeout(h.controller_with(options).run("fraud_scoring", &job, run_date())).await;

    let report = outcome.failure().unwrap();
    assert_eq!(report.kind, FailureKind::UnexpectedError);
    assert_eq!(report.stage, Stage::SourceCheck);
    assert!(report.detail.contains("did not finish"));
    assert!(engine.invocations().is_empty());
    assert_eq!(
        ledger.status_of("fraud_scoring", run_date()).unwrap(),
        Some(RunStatus::Failed)
    );
}
