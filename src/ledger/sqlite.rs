// src/ledger/sqlite.rs

//! SQLite-backed run ledger.
//!
//! Schema (created on open):
//!
//! ```sql
//! CREATE TABLE job_run_ledger (
//!     job_id            TEXT NOT NULL,
//!     run_date          TEXT NOT NULL,
//!     job_name          TEXT NOT NULL,
//!     status            TEXT NOT NULL,
//!     start_time        TEXT,
//!     end_time          TEXT,
//!     records_processed INTEGER,
//!     error_message     TEXT,
//!     PRIMARY KEY (job_id, run_date)
//! );
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::ledger::{ensure_transition, LedgerError, LedgerResult, RunLedger, RunRecord};
use crate::types::RunStatus;

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "job_id, run_date, job_name, status, start_time, end_time, \
                              records_processed, error_message";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open (or create) the ledger at `path`. `":memory:"` opens a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let opened = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        LedgerError::Unavailable(format!("creating ledger dir {:?}: {e}", parent))
                    })?;
                }
            }
            Connection::open(path)
        };
        let conn = opened.map_err(unavailable("open sqlite ledger"))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(unavailable("set busy timeout"))?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.ensure_schema()?;
        info!(path = ?path, "opened sqlite run ledger");
        Ok(ledger)
    }

    fn ensure_schema(&self) -> LedgerResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS job_run_ledger (
                 job_id            TEXT NOT NULL,
                 run_date          TEXT NOT NULL,
                 job_name          TEXT NOT NULL,
                 status            TEXT NOT NULL,
                 start_time        TEXT,
                 end_time          TEXT,
                 records_processed INTEGER,
                 error_message     TEXT,
                 PRIMARY KEY (job_id, run_date)
             );
             CREATE INDEX IF NOT EXISTS idx_job_run_ledger_run_date
                 ON job_run_ledger (run_date);",
        )
        .map_err(unavailable("create ledger schema"))
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Unavailable("sqlite ledger lock poisoned".to_string()))
    }

    fn finish(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        to: RunStatus,
        records_processed: Option<u64>,
        error_message: Option<&str>,
    ) -> LedgerResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(unavailable("begin transition"))?;

        let current = read_status(&tx, job_id, run_date)?.ok_or_else(|| LedgerError::NotFound {
            job_id: job_id.to_string(),
            run_date,
        })?;
        ensure_transition(job_id, run_date, current, to)?;

        let count = records_processed.map(count_to_sql).transpose()?;
        tx.execute(
            "UPDATE job_run_ledger
             SET status = ?3,
                 end_time = ?4,
                 records_processed = ?5,
                 error_message = ?6
             WHERE job_id = ?1 AND run_date = ?2",
            params![job_id, run_date, to.as_str(), Utc::now(), count, error_message],
        )
        .map_err(unavailable("update ledger record"))?;
        tx.commit().map_err(unavailable("commit transition"))?;

        debug!(job = %job_id, %run_date, status = %to, "ledger record finished (sqlite)");
        Ok(())
    }
}

impl RunLedger for SqliteLedger {
    fn register(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        job_name: &str,
    ) -> LedgerResult<RunRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO job_run_ledger (job_id, run_date, job_name, status)
             VALUES (?1, ?2, ?3, 'PENDING')",
            params![job_id, run_date, job_name],
        )
        .map_err(unavailable("register run"))?;

        read_record(&conn, job_id, run_date)?.ok_or_else(|| LedgerError::NotFound {
            job_id: job_id.to_string(),
            run_date,
        })
    }

    fn claim(&self, job_id: &str, run_date: NaiveDate, job_name: &str) -> LedgerResult<RunRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(unavailable("begin claim"))?;

        if read_status(&tx, job_id, run_date)? == Some(RunStatus::Running) {
            warn!(
                job = %job_id,
                %run_date,
                "re-claiming a run that is still RUNNING; a duplicate invocation may be active"
            );
        }

        let record = RunRecord::running(job_id, run_date, job_name, Utc::now());
        tx.execute(
            "INSERT INTO job_run_ledger (job_id, run_date, job_name, status, start_time)
             VALUES (?1, ?2, ?3, 'RUNNING', ?4)
             ON CONFLICT(job_id, run_date) DO UPDATE SET
                 job_name = excluded.job_name,
                 status = 'RUNNING',
                 start_time = excluded.start_time,
                 end_time = NULL,
                 records_processed = NULL,
                 error_message = NULL",
            params![job_id, run_date, job_name, record.start_time],
        )
        .map_err(unavailable("claim run"))?;
        tx.commit().map_err(unavailable("commit claim"))?;

        Ok(record)
    }

    fn complete(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        records_processed: u64,
    ) -> LedgerResult<()> {
        self.finish(
            job_id,
            run_date,
            RunStatus::Completed,
            Some(records_processed),
            None,
        )
    }

    fn fail(&self, job_id: &str, run_date: NaiveDate, error_message: &str) -> LedgerResult<()> {
        self.finish(job_id, run_date, RunStatus::Failed, None, Some(error_message))
    }

    fn status_of(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunStatus>> {
        let conn = self.lock()?;
        read_status(&conn, job_id, run_date)
    }

    fn record(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunRecord>> {
        let conn = self.lock()?;
        read_record(&conn, job_id, run_date)
    }

    fn records_for(&self, run_date: NaiveDate) -> LedgerResult<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM job_run_ledger WHERE run_date = ?1 ORDER BY job_id"
            ))
            .map_err(unavailable("prepare records_for"))?;
        let rows = stmt
            .query_map(params![run_date], record_from_row)
            .map_err(unavailable("query records_for"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable("read records_for"))
    }
}

fn read_status(
    conn: &Connection,
    job_id: &str,
    run_date: NaiveDate,
) -> LedgerResult<Option<RunStatus>> {
    conn.query_row(
        "SELECT status FROM job_run_ledger WHERE job_id = ?1 AND run_date = ?2",
        params![job_id, run_date],
        |row| status_from_row(row, 0),
    )
    .optional()
    .map_err(unavailable("read run status"))
}

fn read_record(
    conn: &Connection,
    job_id: &str,
    run_date: NaiveDate,
) -> LedgerResult<Option<RunRecord>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM job_run_ledger WHERE job_id = ?1 AND run_date = ?2"),
        params![job_id, run_date],
        record_from_row,
    )
    .optional()
    .map_err(unavailable("read run record"))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let records_processed: Option<i64> = row.get(6)?;
    Ok(RunRecord {
        job_id: row.get(0)?,
        run_date: row.get(1)?,
        job_name: row.get(2)?,
        status: status_from_row(row, 3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        records_processed: records_processed.map(|n| n.max(0) as u64),
        error_message: row.get(7)?,
    })
}

fn status_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<RunStatus> {
    let raw: String = row.get(idx)?;
    raw.parse::<RunStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn count_to_sql(n: u64) -> LedgerResult<i64> {
    i64::try_from(n)
        .map_err(|_| LedgerError::Unavailable(format!("records_processed {n} exceeds i64")))
}

fn unavailable(what: &'static str) -> impl Fn(rusqlite::Error) -> LedgerError {
    move |e| LedgerError::Unavailable(format!("{what}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn claim_is_an_upsert_on_job_and_date() {
        let ledger = SqliteLedger::open(":memory:").unwrap();
        ledger.claim("ingest", day(1), "Ingest").unwrap();
        ledger.complete("ingest", day(1), 10).unwrap();
        ledger.claim("ingest", day(1), "Ingest v2").unwrap();
        ledger.claim("ingest", day(2), "Ingest").unwrap();

        let recs = ledger.records_for(day(1)).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].status, RunStatus::Running);
        assert_eq!(recs[0].job_name, "Ingest v2");
        assert_eq!(recs[0].records_processed, None);
        assert_eq!(recs[0].end_time, None);
    }

    #[test]
    fn fail_records_message_and_end_time() {
        let ledger = SqliteLedger::open(":memory:").unwrap();
        ledger.register("score", day(3), "Scoring").unwrap();
        assert_eq!(
            ledger.status_of("score", day(3)).unwrap(),
            Some(RunStatus::Pending)
        );

        ledger.claim("score", day(3), "Scoring").unwrap();
        ledger.fail("score", day(3), "execute: exit 2").unwrap();

        let rec = ledger.record("score", day(3)).unwrap().unwrap();
        assert_eq!(rec.status, RunStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("execute: exit 2"));
        assert!(rec.end_time.unwrap() >= rec.start_time.unwrap());
    }

    #[test]
    fn complete_on_missing_row_is_not_found() {
        let ledger = SqliteLedger::open(":memory:").unwrap();
        let err = ledger.complete("ghost", day(1), 0).unwrap_err();
        assert_eq!(
            err,
            LedgerError::NotFound {
                job_id: "ghost".to_string(),
                run_date: day(1)
            }
        );
    }

    #[test]
    fn completed_cannot_be_completed_again() {
        let ledger = SqliteLedger::open(":memory:").unwrap();
        ledger.claim("a", day(1), "A").unwrap();
        ledger.complete("a", day(1), 1).unwrap();
        let err = ledger.complete("a", day(1), 2).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        let rec = ledger.record("a", day(1)).unwrap().unwrap();
        assert_eq!(rec.records_processed, Some(1));
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.claim("a", day(1), "A").unwrap();
            ledger.complete("a", day(1), 7).unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        assert_eq!(
            ledger.status_of("a", day(1)).unwrap(),
            Some(RunStatus::Completed)
        );
    }
}
