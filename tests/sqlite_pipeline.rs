// tests/sqlite_pipeline.rs
//
// Two jobs sharing an on-disk ledger and warehouse, run the way the CLI
// runs them: each invocation gets fresh handles.

use std::sync::Arc;

use chrono::NaiveDate;
use rungate::config::{ConfigFile, JobConfig};
use rungate::engine::{Components, ControllerOptions, LifecycleController, RunOutcome};
use rungate::exec::{ComputeEngine, ShellEngine};
use rungate::fs::RealFileSystem;
use rungate::ledger::{RunLedger, SqliteLedger};
use rungate::postprocess::{SqliteWarehouse, Warehouse};
use rungate::types::RunStatus;
use rungate_test_utils::builders::{ConfigFileBuilder, JobConfigBuilder};
use rungate_test_utils::fakes::{FakeEngine, RecordingNotifier};
use rungate_test_utils::{date, init_tracing, with_timeout};
use tempfile::TempDir;

const RUN_DATE: (i32, u32, u32) = (2024, 7, 1);

fn run_date() -> NaiveDate {
    date(RUN_DATE.0, RUN_DATE.1, RUN_DATE.2)
}

struct Workspace {
    _dir: TempDir,
    cfg: ConfigFile,
}

impl Workspace {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigFileBuilder::new()
            .with_ledger_path(dir.path().join("state.db"))
            .with_job("ingest", JobConfigBuilder::new("ingest").build())
            .with_job(
                "fraud_scoring",
                JobConfigBuilder::new("score --date {run_date}")
                    .after("ingest")
                    .source_count_sql(
                        "SELECT COUNT(*) FROM transactions WHERE run_date = :run_date",
                    )
                    .processed_count(
                        "SELECT COUNT(*) FROM transactions WHERE run_date = :run_date AND amount > 1000",
                    )
                    .rollup(
                        "daily_totals",
                        &["run_date", "account_id"],
                        "SELECT run_date, account_id, SUM(amount) AS total FROM transactions
                         WHERE run_date = :run_date GROUP BY run_date, account_id",
                    )
                    .alert(
                        "HIGH_VALUE",
                        "SELECT DISTINCT account_id, 'amount above 1000' FROM transactions
                         WHERE run_date = :run_date AND amount > 1000",
                    )
                    .build(),
            )
            .build();

        let warehouse = SqliteWarehouse::open(cfg.config.effective_warehouse_path()).unwrap();
        warehouse
            .with_connection(|c| {
                c.execute_batch(
                    "CREATE TABLE transactions (txn_id INTEGER, account_id TEXT, amount REAL, run_date TEXT);
                     INSERT INTO transactions VALUES
                         (1, 'acc-1', 9500.0, '2024-07-01'),
                         (2, 'acc-1', 12.5,   '2024-07-01'),
                         (3, 'acc-2', 80.0,   '2024-07-01'),
                         (4, 'acc-3', 4200.0, '2024-07-02');
                     CREATE TABLE daily_totals (run_date TEXT, account_id TEXT, total REAL);",
                )
            })
            .unwrap();

        Self { _dir: dir, cfg }
    }

    fn job(&self, id: &str) -> &JobConfig {
        self.cfg.job(id).unwrap()
    }

    fn ledger(&self) -> SqliteLedger {
        SqliteLedger::open(&self.cfg.config.ledger_path).unwrap()
    }

    fn warehouse(&self) -> SqliteWarehouse {
        SqliteWarehouse::open(self.cfg.config.effective_warehouse_path()).unwrap()
    }

    async fn run(&self, id: &str, engine: Arc<dyn ComputeEngine>) -> RunOutcome {
        let controller = LifecycleController::new(
            Components {
                ledger: Arc::new(self.ledger()),
                engine,
                warehouse: Arc::new(self.warehouse()),
                notifier: Arc::new(RecordingNotifier::new()),
                fs: Arc::new(RealFileSystem),
            },
            ControllerOptions::default(),
        );
        with_timeout(controller.run(id, self.job(id), run_date())).await
    }

    fn totals(&self) -> Vec<(String, f64)> {
        self.warehouse()
            .with_connection(|c| {
                let mut stmt = c.prepare(
                    "SELECT account_id, total FROM daily_totals ORDER BY account_id",
                )?;
                let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .unwrap()
    }
}

#[tokio::test]
async fn downstream_waits_for_upstream_across_invocations() {
    let ws = Workspace::new();

    let blocked = ws.run("fraud_scoring", Arc::new(FakeEngine::succeeding())).await;
    assert_eq!(blocked.exit_code(), 1);
    assert_eq!(ws.ledger().status_of("fraud_scoring", run_date()).unwrap(), None);

    assert!(ws.run("ingest", Arc::new(FakeEngine::succeeding())).await.is_completed());
    let scored = ws.run("fraud_scoring", Arc::new(FakeEngine::succeeding())).await;
    assert!(matches!(
        scored,
        RunOutcome::Completed { records_processed: 1, compute_invoked: true, .. }
    ));

    let records = ws.ledger().records_for(run_date()).unwrap();
    let summary: Vec<(&str, RunStatus)> = records
        .iter()
        .map(|r| (r.job_id.as_str(), r.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("fraud_scoring", RunStatus::Completed),
            ("ingest", RunStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn rerunning_a_completed_date_does_not_duplicate_outputs() {
    let ws = Workspace::new();
    assert!(ws.run("ingest", Arc::new(FakeEngine::succeeding())).await.is_completed());

    assert!(ws.run("fraud_scoring", Arc::new(FakeEngine::succeeding())).await.is_completed());
    let first_totals = ws.totals();
    let first_alerts = ws.warehouse().alerts_for(run_date()).unwrap();

    assert!(ws.run("fraud_scoring", Arc::new(FakeEngine::succeeding())).await.is_completed());
    assert_eq!(ws.totals(), first_totals);
    assert_eq!(ws.warehouse().alerts_for(run_date()).unwrap(), first_alerts);

    assert_eq!(
        first_totals,
        vec![("acc-1".to_string(), 9512.5), ("acc-2".to_string(), 80.0)]
    );
    assert_eq!(first_alerts.len(), 1);
    assert_eq!(first_alerts[0].entity_id, "acc-1");
    assert_eq!(first_alerts[0].job_id, "fraud_scoring");
}

#[cfg(unix)]
#[tokio::test]
async fn shell_engine_exit_code_is_the_process_exit_code() {
    let ws = Workspace::new();
    let mut cfg = ws.cfg.clone();
    let job = cfg.job.get_mut("ingest").unwrap();
    job.cmd = "exit 4".to_string();

    let controller = LifecycleController::new(
        Components {
            ledger: Arc::new(ws.ledger()),
            engine: Arc::new(ShellEngine),
            warehouse: Arc::new(ws.warehouse()),
            notifier: Arc::new(RecordingNotifier::new()),
            fs: Arc::new(RealFileSystem),
        },
        ControllerOptions::default(),
    );
    let outcome = with_timeout(controller.run("ingest", &cfg.job["ingest"], run_date())).await;

    assert_eq!(outcome.exit_code(), 4);
    let record = ws.ledger().record("ingest", run_date()).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert!(record.end_time.is_some());
}
