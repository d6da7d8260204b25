use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{LoadStatus, Quarter, StagingFormat, Table};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("authentication to the target store failed: {0}")]
    Auth(#[source] sqlx::Error),

    #[error("target store unreachable: {0}")]
    Unreachable(#[source] sqlx::Error),

    #[error("schema conflict: {0}")]
    SchemaConflict(#[source] sqlx::Error),

    #[error("transaction failed: {0}")]
    TxnFailed(#[source] sqlx::Error),

    #[error("bulk format rejected: {0}")]
    BulkFormat(#[source] sqlx::Error),

    #[error("constraint violation: {0}")]
    Constraint(#[source] sqlx::Error),

    #[error("data-quality checks failed: {0}")]
    DqFailed(String),

    #[error("no backend registered under '{0}'")]
    UnknownBackend(String),

    #[error("staged chunk unreadable: {0}")]
    ChunkIo(#[from] std::io::Error),

    #[error("metadata query failed: {0}")]
    Metadata(#[source] sqlx::Error),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// One post-load data-quality check and its outcome.
#[derive(Debug, Clone)]
pub struct DqCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// The DQ summary attached to a load. Any failing check fails the quarter.
#[derive(Debug, Clone, Default)]
pub struct DqReport {
    pub checks: Vec<DqCheck>,
}

impl DqReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DqCheck> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

/// One load-history row, keyed by `load_id`. A row is inserted as STARTED
/// and moved to exactly one terminal status.
#[derive(Debug, Clone)]
pub struct LoadRecord {
    pub load_id: Uuid,
    pub quarter: Quarter,
    pub mode: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source_checksum: Option<String>,
    pub error: Option<String>,
}

/// Per-table row counters persisted alongside a load.
#[derive(Debug, Clone, Copy)]
pub struct TableCounts {
    pub table: Table,
    pub rows_in: u64,
    pub rows_after_dedup: u64,
}

/// The backend contract. One connected instance serves one load run;
/// per-quarter mutation happens between `begin_txn` and `commit`, and the
/// process-metadata writers participate in the same transaction so a
/// SUCCESS row commits with its data or not at all.
#[async_trait]
pub trait Loader: Send + std::fmt::Debug {
    /// The staged-chunk format this backend ingests over its bulk path.
    /// Deduplicated outputs are written in this format.
    fn bulk_format(&self) -> StagingFormat;

    /// Creates the seven FAERS tables and the `_faers_*` metadata tables if
    /// absent.
    async fn prepare_schema(&mut self) -> Result<(), LoadError>;

    async fn begin_txn(&mut self) -> Result<(), LoadError>;
    async fn commit(&mut self) -> Result<(), LoadError>;
    async fn rollback(&mut self) -> Result<(), LoadError>;

    /// Streams one staged chunk into `table` over the native bulk path,
    /// returning the rows loaded. Never row-by-row.
    async fn bulk_load(&mut self, table: Table, chunk: &Path) -> Result<u64, LoadError>;

    /// Deletes every row of every table belonging to the given CASEIDs.
    /// Returns the number of DEMO rows removed.
    async fn delete_cases(&mut self, caseids: &BTreeSet<String>) -> Result<u64, LoadError>;

    /// Replaces the given CASEIDs with the incoming deduplicated rows:
    /// existing versions are deleted across all seven tables, then each
    /// table's chunks are bulk-loaded. Returns total rows appended.
    async fn delta_merge(
        &mut self,
        sources: &[(Table, Vec<PathBuf>)],
        caseids: &BTreeSet<String>,
    ) -> Result<u64, LoadError> {
        self.delete_cases(caseids).await?;
        let mut appended = 0u64;
        for (table, chunks) in sources {
            for chunk in chunks {
                appended += self.bulk_load(*table, chunk).await?;
            }
        }
        Ok(appended)
    }

    /// Runs the post-load data-quality checks against the visible state.
    async fn exec_dq_checks(&mut self) -> Result<DqReport, LoadError>;

    async fn close(self: Box<Self>) -> Result<(), LoadError>;

    // Process metadata, colocated with the target data.

    async fn record_started(&mut self, record: &LoadRecord) -> Result<(), LoadError>;

    async fn record_finished(
        &mut self,
        load_id: Uuid,
        status: LoadStatus,
        source_checksum: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), LoadError>;

    async fn record_row_counts(
        &mut self,
        load_id: Uuid,
        counts: &[TableCounts],
    ) -> Result<(), LoadError>;

    async fn latest_success_quarter(&mut self) -> Result<Option<Quarter>, LoadError>;

    async fn latest_success_checksum(
        &mut self,
        quarter: Quarter,
    ) -> Result<Option<String>, LoadError>;

    async fn history(&mut self, quarter: Option<Quarter>) -> Result<Vec<LoadRecord>, LoadError>;
}
