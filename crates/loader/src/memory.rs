//! An in-memory backend used by orchestrator and CLI tests: faithful to the
//! contract's transactional semantics, with injectable failure points.

use crate::contract::{DqCheck, DqReport, LoadError, LoadRecord, Loader, TableCounts};
use async_trait::async_trait;
use chrono::Utc;
use models::{LoadStatus, Quarter, StagingFormat, Table};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    BulkLoad(Table),
    DeleteCases,
    Commit,
    DqChecks,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryState {
    pub tables: BTreeMap<Table, Vec<Vec<Option<String>>>>,
    pub history: Vec<LoadRecord>,
    pub counts: BTreeMap<Uuid, Vec<TableCounts>>,
    pub bulk_loads: u64,
}

impl MemoryState {
    pub fn rows(&self, table: Table) -> &[Vec<Option<String>>] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn caseids(&self, table: Table) -> BTreeSet<String> {
        self.rows(table)
            .iter()
            .filter_map(|row| row.get(1).cloned().flatten())
            .collect()
    }
}

#[derive(Debug)]
pub struct MemoryLoader {
    state: Arc<Mutex<MemoryState>>,
    snapshot: Option<MemoryState>,
    pub fail_on: Option<FailPoint>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader {
            state: Arc::new(Mutex::new(MemoryState::default())),
            snapshot: None,
            fail_on: None,
        }
    }

    /// A fresh loader over already-shared state, for tests that span
    /// multiple connections to the same target.
    pub fn with_state(state: Arc<Mutex<MemoryState>>) -> MemoryLoader {
        MemoryLoader {
            state,
            snapshot: None,
            fail_on: None,
        }
    }

    /// A handle to the shared state, usable after the loader is boxed away.
    pub fn state(&self) -> Arc<Mutex<MemoryState>> {
        Arc::clone(&self.state)
    }

    fn trip(&self, point: FailPoint) -> Result<(), LoadError> {
        if self.fail_on == Some(point) {
            return Err(LoadError::Backend(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory state poisoned")
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        MemoryLoader::new()
    }
}

#[async_trait]
impl Loader for MemoryLoader {
    fn bulk_format(&self) -> StagingFormat {
        StagingFormat::Csv
    }

    async fn prepare_schema(&mut self) -> Result<(), LoadError> {
        let mut state = self.lock();
        for table in Table::ALL {
            state.tables.entry(table).or_default();
        }
        Ok(())
    }

    async fn begin_txn(&mut self) -> Result<(), LoadError> {
        let snapshot = self.lock().clone();
        self.snapshot = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.trip(FailPoint::Commit)?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.lock() = snapshot;
        }
        Ok(())
    }

    async fn bulk_load(&mut self, table: Table, chunk: &Path) -> Result<u64, LoadError> {
        self.trip(FailPoint::BulkLoad(table))?;

        let mut reader = csv::Reader::from_path(chunk)
            .map_err(|err| LoadError::Backend(format!("unreadable chunk: {err}")))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|err| LoadError::Backend(format!("bad chunk record: {err}")))?;
            rows.push(
                record
                    .iter()
                    .map(|value| Some(value.to_string()).filter(|v| !v.is_empty()))
                    .collect::<Vec<_>>(),
            );
        }

        let loaded = rows.len() as u64;
        let mut state = self.lock();
        state.tables.entry(table).or_default().extend(rows);
        state.bulk_loads += 1;
        Ok(loaded)
    }

    async fn delete_cases(&mut self, caseids: &BTreeSet<String>) -> Result<u64, LoadError> {
        self.trip(FailPoint::DeleteCases)?;
        let mut state = self.lock();
        let mut demo_rows = 0u64;
        for table in Table::ALL {
            let rows = state.tables.entry(table).or_default();
            let before = rows.len();
            rows.retain(|row| {
                row.get(1)
                    .and_then(|caseid| caseid.as_deref())
                    .map_or(true, |caseid| !caseids.contains(caseid))
            });
            if table == Table::Demo {
                demo_rows = (before - rows.len()) as u64;
            }
        }
        Ok(demo_rows)
    }

    async fn exec_dq_checks(&mut self) -> Result<DqReport, LoadError> {
        self.trip(FailPoint::DqChecks)?;
        let state = self.lock();
        let mut report = DqReport::default();

        let missing = state
            .rows(Table::Demo)
            .iter()
            .filter(|row| row.first().map_or(true, Option::is_none))
            .count();
        report.checks.push(DqCheck {
            name: "demo_primaryid_present".to_string(),
            passed: missing == 0,
            detail: format!("{missing} demo rows with a missing primaryid"),
        });

        // Count distinct primaryids that occur more than once, matching the
        // reference backend's GROUP BY ... HAVING count(*) > 1 query.
        let mut id_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in state.rows(Table::Demo) {
            if let Some(id) = row.first().and_then(|id| id.as_deref()) {
                *id_counts.entry(id).or_insert(0) += 1;
            }
        }
        let duplicates = id_counts.values().filter(|count| **count > 1).count();
        report.checks.push(DqCheck {
            name: "demo_primaryid_unique".to_string(),
            passed: duplicates == 0,
            detail: format!("{duplicates} duplicated primaryids in demo"),
        });

        for table in Table::CHILDREN {
            let orphans = state
                .rows(table)
                .iter()
                .filter(|row| {
                    row.first()
                        .and_then(|id| id.as_deref())
                        .map_or(true, |id| !id_counts.contains_key(id))
                })
                .count();
            report.checks.push(DqCheck {
                name: format!("{table}_cascade"),
                passed: orphans == 0,
                detail: format!("{orphans} {table} rows without a demo parent"),
            });
        }

        Ok(report)
    }

    async fn close(self: Box<Self>) -> Result<(), LoadError> {
        Ok(())
    }

    async fn record_started(&mut self, record: &LoadRecord) -> Result<(), LoadError> {
        self.lock().history.push(record.clone());
        Ok(())
    }

    async fn record_finished(
        &mut self,
        load_id: Uuid,
        status: LoadStatus,
        source_checksum: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), LoadError> {
        let mut state = self.lock();
        let record = state
            .history
            .iter_mut()
            .find(|record| record.load_id == load_id)
            .ok_or_else(|| LoadError::Backend(format!("unknown load_id {load_id}")))?;
        record.status = status.as_str().to_string();
        record.finished_at = Some(Utc::now());
        if source_checksum.is_some() {
            record.source_checksum = source_checksum.map(str::to_string);
        }
        record.error = error.map(str::to_string);
        Ok(())
    }

    async fn record_row_counts(
        &mut self,
        load_id: Uuid,
        counts: &[TableCounts],
    ) -> Result<(), LoadError> {
        self.lock().counts.insert(load_id, counts.to_vec());
        Ok(())
    }

    async fn latest_success_quarter(&mut self) -> Result<Option<Quarter>, LoadError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|record| record.status == LoadStatus::Success.as_str())
            .map(|record| record.quarter)
            .max())
    }

    async fn latest_success_checksum(
        &mut self,
        quarter: Quarter,
    ) -> Result<Option<String>, LoadError> {
        Ok(self
            .lock()
            .history
            .iter()
            .rev()
            .find(|record| {
                record.quarter == quarter && record.status == LoadStatus::Success.as_str()
            })
            .and_then(|record| record.source_checksum.clone()))
    }

    async fn history(&mut self, quarter: Option<Quarter>) -> Result<Vec<LoadRecord>, LoadError> {
        Ok(self
            .lock()
            .history
            .iter()
            .filter(|record| quarter.map_or(true, |q| record.quarter == q))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn chunk(dir: &Path, rows: &[&[&str]]) -> std::path::PathBuf {
        let path = dir.join("chunk-00000.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "primaryid,caseid,pt,drug_rec_act").unwrap();
        for row in rows {
            writeln!(file, "{}", row.join(",")).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn rollback_restores_the_pre_transaction_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = chunk(dir.path(), &[&["1001", "100", "Nausea", ""]]);

        let mut loader = MemoryLoader::new();
        loader.prepare_schema().await.unwrap();
        loader.begin_txn().await.unwrap();
        assert_eq!(1, loader.bulk_load(Table::Reac, &path).await.unwrap());
        loader.rollback().await.unwrap();
        assert!(loader.lock().rows(Table::Reac).is_empty());
    }

    #[tokio::test]
    async fn injected_failures_fire_at_their_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = chunk(dir.path(), &[&["1001", "100", "Nausea", ""]]);

        let mut loader = MemoryLoader::new();
        loader.fail_on = Some(FailPoint::BulkLoad(Table::Reac));
        loader.prepare_schema().await.unwrap();
        assert!(loader.bulk_load(Table::Demo, &path).await.is_ok());
        assert!(loader.bulk_load(Table::Reac, &path).await.is_err());
    }
}
