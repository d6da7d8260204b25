//! Case-version deduplication. Within the working set, each CASEID keeps the
//! row with the greatest `FDA_DT`, ties broken toward the greatest
//! `PRIMARYID`; missing or partial dates rank below any present date. The
//! DEMO table drives selection, and the six child tables are then filtered
//! by surviving-PRIMARYID membership.

use models::{NullificationSet, Table, VersionKey};
use staging::{read_chunk, StagedTables, StagingArea, StagingError, TableChunks};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("staged demo chunk is missing required columns")]
    MissingKeyColumns,
}

/// The deduplicated per-table outputs, written in the loader-negotiated
/// format, plus the surviving CASEID set that drives delta-merge deletion.
#[derive(Debug)]
pub struct DedupOutcome {
    pub tables: BTreeMap<Table, TableChunks>,
    pub caseids: BTreeSet<String>,
    pub rows_after: BTreeMap<Table, u64>,
    /// DEMO rows dropped for lacking a primaryid or caseid. Degraded, not
    /// fatal.
    pub dropped_rows: u64,
}

/// Runs selection over `staged` and writes filtered outputs into `output`.
/// CASEIDs in `nullified` never survive, even when the quarter also carries
/// data rows for them. Deterministic given identical input chunks.
pub fn deduplicate(
    staged: &StagedTables,
    nullified: &NullificationSet,
    output: &StagingArea,
) -> Result<DedupOutcome, DedupError> {
    let fda_dt = Table::Demo
        .column_index("fda_dt")
        .ok_or(DedupError::MissingKeyColumns)?;

    // Pass 1: reduce DEMO to the best version key per CASEID. Only the
    // selection keys are held; row data streams through.
    let mut best: BTreeMap<String, VersionKey> = BTreeMap::new();
    let mut dropped = 0u64;
    for file in staged.files(Table::Demo) {
        for row in read_chunk(file, Table::Demo, staged.format)? {
            let row = row?;
            let (Some(primaryid), Some(caseid)) = (row[0].as_deref(), row[1].as_deref()) else {
                dropped += 1;
                continue;
            };
            if nullified.contains(caseid) {
                continue;
            }
            let key = VersionKey::new(row[fda_dt].as_deref(), primaryid);
            match best.entry(caseid.to_string()) {
                Entry::Occupied(mut entry) => {
                    if key > *entry.get() {
                        entry.insert(key);
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(key);
                }
            }
        }
    }

    let survivors: HashSet<&str> = best.values().map(|k| k.primaryid.as_str()).collect();
    tracing::info!(
        cases = best.len(),
        dropped_rows = dropped,
        nullified = nullified.len(),
        "selected surviving case versions"
    );

    // Pass 2: filter each table by surviving-PRIMARYID membership. DEMO is
    // additionally uniqued so exactly one row per survivor is emitted.
    let mut tables = BTreeMap::new();
    let mut rows_after = BTreeMap::new();
    let mut emitted_demo: HashSet<String> = HashSet::new();
    for table in Table::ALL {
        let mut writer = output.writer(table)?;
        for file in staged.files(table) {
            for row in read_chunk(file, table, staged.format)? {
                let row = row?;
                let Some(primaryid) = row[0].as_deref() else {
                    continue;
                };
                if !survivors.contains(primaryid) {
                    continue;
                }
                if table == Table::Demo && !emitted_demo.insert(primaryid.to_string()) {
                    continue;
                }
                writer.push(row)?;
            }
        }
        let chunks = writer.finish()?;
        rows_after.insert(table, chunks.rows);
        tables.insert(table, chunks);
    }

    Ok(DedupOutcome {
        tables,
        caseids: best.into_keys().collect(),
        rows_after,
        dropped_rows: dropped,
    })
}
