// src/ledger/memory.rs

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::ledger::{ensure_transition, LedgerError, LedgerResult, RunLedger, RunRecord};
use crate::types::RunStatus;

type Key = (String, NaiveDate);

/// Ledger kept in memory only (lost on exit).
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<Key, RunRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing the lifecycle (tests, imports).
    pub fn insert(&self, record: RunRecord) -> LedgerResult<()> {
        let mut records = self.lock()?;
        records.insert((record.job_id.clone(), record.run_date), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, BTreeMap<Key, RunRecord>>> {
        self.records
            .lock()
            .map_err(|_| LedgerError::Unavailable("memory ledger lock poisoned".to_string()))
    }

    fn finish(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        to: RunStatus,
        apply: impl FnOnce(&mut RunRecord),
    ) -> LedgerResult<()> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(&(job_id.to_string(), run_date))
            .ok_or_else(|| LedgerError::NotFound {
                job_id: job_id.to_string(),
                run_date,
            })?;
        ensure_transition(job_id, run_date, record.status, to)?;
        record.status = to;
        record.end_time = Some(Utc::now());
        apply(record);
        debug!(job = %job_id, %run_date, status = %to, "ledger record finished (memory)");
        Ok(())
    }
}

impl RunLedger for MemoryLedger {
    fn register(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        job_name: &str,
    ) -> LedgerResult<RunRecord> {
        let mut records = self.lock()?;
        let record = records
            .entry((job_id.to_string(), run_date))
            .or_insert_with(|| RunRecord::pending(job_id, run_date, job_name));
        Ok(record.clone())
    }

    fn claim(&self, job_id: &str, run_date: NaiveDate, job_name: &str) -> LedgerResult<RunRecord> {
        let mut records = self.lock()?;
        let key = (job_id.to_string(), run_date);

        if let Some(prior) = records.get(&key) {
            if prior.status == RunStatus::Running {
                warn!(
                    job = %job_id,
                    %run_date,
                    "re-claiming a run that is still RUNNING; a duplicate invocation may be active"
                );
            }
        }

        let record = RunRecord::running(job_id, run_date, job_name, Utc::now());
        records.insert(key, record.clone());
        Ok(record)
    }

    fn complete(
        &self,
        job_id: &str,
        run_date: NaiveDate,
        records_processed: u64,
    ) -> LedgerResult<()> {
        self.finish(job_id, run_date, RunStatus::Completed, |r| {
            r.records_processed = Some(records_processed);
        })
    }

    fn fail(&self, job_id: &str, run_date: NaiveDate, error_message: &str) -> LedgerResult<()> {
        self.finish(job_id, run_date, RunStatus::Failed, |r| {
            r.error_message = Some(error_message.to_string());
        })
    }

    fn status_of(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunStatus>> {
        let records = self.lock()?;
        Ok(records
            .get(&(job_id.to_string(), run_date))
            .map(|r| r.status))
    }

    fn record(&self, job_id: &str, run_date: NaiveDate) -> LedgerResult<Option<RunRecord>> {
        let records = self.lock()?;
        Ok(records.get(&(job_id.to_string(), run_date)).cloned())
    }

    fn records_for(&self, run_date: NaiveDate) -> LedgerResult<Vec<RunRecord>> {
        let records = self.lock()?;
        Ok(records
            .values()
            .filter(|r| r.run_date == run_date)
            .cloned()
            .collect())
    }
}
