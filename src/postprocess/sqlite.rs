// src/postprocess/sqlite.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Statement};
use tracing::{debug, info, warn};

use crate::config::model::{AlertSpec, RollupSpec};
use crate::config::validate::is_sql_identifier;

use super::{AlertRecord, Warehouse};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed warehouse.
///
/// Source tables and rollup targets are owned by whoever loads the data;
/// only the `run_alerts` table is created here.
#[derive(Clone)]
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWarehouse {
    /// Open (or create) the warehouse at `path`; `":memory:"` is private to
    /// this handle.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory().context("open in-memory warehouse")?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating warehouse dir {:?}", parent))?;
                }
            }
            Connection::open(path).with_context(|| format!("open warehouse {:?}", path))?
        };
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("set warehouse busy timeout")?;

        let warehouse = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        warehouse.ensure_schema()?;
        info!(path = ?path, "opened sqlite warehouse");
        Ok(warehouse)
    }

    /// Direct access to the connection (fixtures, ad hoc inspection).
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.lock()?;
        f(&conn).map_err(anyhow::Error::from)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_alerts (
                 run_date   TEXT NOT NULL,
                 entity_id  TEXT NOT NULL,
                 alert_type TEXT NOT NULL,
                 job_id     TEXT NOT NULL,
                 detail     TEXT,
                 created_at TEXT NOT NULL,
                 UNIQUE (run_date, entity_id, alert_type)
             );",
        )
        .context("create run_alerts table")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite warehouse lock poisoned"))
    }
}

impl Warehouse for SqliteWarehouse {
    fn count(&self, query: &str, run_date: NaiveDate) -> Result<u64> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(query)
            .with_context(|| format!("preparing count query `{query}`"))?;
        bind_run_date(&mut stmt, run_date)?;

        let mut rows = stmt.raw_query();
        let row = rows
            .next()?
            .ok_or_else(|| anyhow!("count query returned no rows: `{query}`"))?;
        let n: i64 = row
            .get(0)
            .with_context(|| format!("count query must return an integer: `{query}`"))?;
        if n < 0 {
            bail!("count query returned a negative count ({n})");
        }
        Ok(n as u64)
    }

    fn upsert_rollup(&self, spec: &RollupSpec, run_date: NaiveDate) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let columns: Vec<String> = {
            let stmt = tx
                .prepare(&spec.query)
                .with_context(|| format!("preparing rollup query for '{}'", spec.table))?;
            stmt.column_names().into_iter().map(String::from).collect()
        };
        if let Some(bad) = columns.iter().find(|c| !is_sql_identifier(c)) {
            bail!("rollup query column '{bad}' needs a plain alias");
        }
        if let Some(missing) = spec.key.iter().find(|k| !columns.contains(k)) {
            bail!("rollup key column '{missing}' is not produced by the query");
        }

        // The conflict target needs a uniqueness constraint on the key.
        tx.execute_batch(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS ux_{table}_{suffix} ON {table} ({keys});",
            table = spec.table,
            suffix = spec.key.join("_"),
            keys = spec.key.join(", "),
        ))
        .with_context(|| format!("ensuring unique key on '{}'", spec.table))?;

        let column_list = columns.join(", ");
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !spec.key.contains(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let on_conflict = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        // `WHERE true` disambiguates ON CONFLICT after INSERT ... SELECT.
        let sql = format!(
            "INSERT INTO {table} ({column_list})
             SELECT {column_list} FROM ({query}) WHERE true
             ON CONFLICT ({keys}) {on_conflict}",
            table = spec.table,
            query = spec.query,
            keys = spec.key.join(", "),
        );

        let written = {
            let mut stmt = tx
                .prepare(&sql)
                .with_context(|| format!("preparing upsert into '{}'", spec.table))?;
            bind_run_date(&mut stmt, run_date)?;
            stmt.raw_execute()
                .with_context(|| format!("upserting into '{}'", spec.table))?
        };
        tx.commit()?;

        debug!(table = %spec.table, %run_date, written, "rollup merged");
        Ok(written)
    }

    fn emit_alerts(&self, job_id: &str, spec: &AlertSpec, run_date: NaiveDate) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let candidates: Vec<(String, Option<String>)> = {
            let mut stmt = tx
                .prepare(&spec.query)
                .with_context(|| format!("preparing alert query '{}'", spec.alert_type))?;
            let has_detail = stmt.column_count() > 1;
            bind_run_date(&mut stmt, run_date)?;

            let mut out = Vec::new();
            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next()? {
                let Some(entity) = value_to_string(row.get_ref(0)?) else {
                    warn!(alert_type = %spec.alert_type, "alert query returned a NULL entity id; skipped");
                    continue;
                };
                let detail = if has_detail {
                    value_to_string(row.get_ref(1)?)
                } else {
                    None
                };
                out.push((entity, detail));
            }
            out
        };

        let now = Utc::now();
        let mut emitted = 0;
        for (entity_id, detail) in candidates.iter() {
            emitted += tx.execute(
                "INSERT OR IGNORE INTO run_alerts
                     (run_date, entity_id, alert_type, job_id, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_date, entity_id, spec.alert_type, job_id, detail, now],
            )?;
        }
        tx.commit()?;

        debug!(
            alert_type = %spec.alert_type,
            %run_date,
            candidates = candidates.len(),
            emitted,
            "alerts emitted"
        );
        Ok(emitted)
    }

    fn alerts_for(&self, run_date: NaiveDate) -> Result<Vec<AlertRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_date, entity_id, alert_type, job_id, detail
             FROM run_alerts WHERE run_date = ?1
             ORDER BY alert_type, entity_id",
        )?;
        let rows = stmt.query_map(params![run_date], |row| {
            Ok(AlertRecord {
                run_date: row.get(0)?,
                entity_id: row.get(1)?,
                alert_type: row.get(2)?,
                job_id: row.get(3)?,
                detail: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(anyhow::Error::from)
    }
}

/// Opens a [`SqliteWarehouse`] on first use and keeps it.
///
/// The run's ledger row is claimed before anything touches the warehouse, so
/// a warehouse that cannot be opened ends the run as a recorded failure.
pub struct LazySqliteWarehouse {
    path: PathBuf,
    opened: Mutex<Option<SqliteWarehouse>>,
}

impl LazySqliteWarehouse {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            opened: Mutex::new(None),
        }
    }

    fn get(&self) -> Result<SqliteWarehouse> {
        let mut opened = self
            .opened
            .lock()
            .map_err(|_| anyhow!("lazy warehouse lock poisoned"))?;
        if let Some(ref warehouse) = *opened {
            return Ok(warehouse.clone());
        }
        let warehouse = SqliteWarehouse::open(&self.path)?;
        *opened = Some(warehouse.clone());
        Ok(warehouse)
    }
}

impl Warehouse for LazySqliteWarehouse {
    fn probe(&self) -> Result<()> {
        self.get().map(|_| ())
    }

    fn count(&self, query: &str, run_date: NaiveDate) -> Result<u64> {
        self.get()?.count(query, run_date)
    }

    fn upsert_rollup(&self, spec: &RollupSpec, run_date: NaiveDate) -> Result<usize> {
        self.get()?.upsert_rollup(spec, run_date)
    }

    fn emit_alerts(&self, job_id: &str, spec: &AlertSpec, run_date: NaiveDate) -> Result<usize> {
        self.get()?.emit_alerts(job_id, spec, run_date)
    }

    fn alerts_for(&self, run_date: NaiveDate) -> Result<Vec<AlertRecord>> {
        self.get()?.alerts_for(run_date)
    }
}

fn bind_run_date(stmt: &mut Statement<'_>, run_date: NaiveDate) -> Result<()> {
    if let Some(idx) = stmt.parameter_index(":run_date")? {
        stmt.raw_bind_parameter(idx, run_date)?;
    }
    Ok(())
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}
