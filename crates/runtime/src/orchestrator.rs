use crate::RuntimeError;
use acquire::{discover, AcquireError, CatalogEntry, Fetcher};
use chrono::Utc;
use loader::{LoadRecord, Loader, TableCounts};
use models::{Config, LoadMode, LoadStatus, Quarter, Table};
use staging::StagingArea;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The terminal outcome of one quarter's unit of work.
#[derive(Debug)]
pub struct QuarterSummary {
    pub quarter: Quarter,
    pub load_id: Uuid,
    pub status: LoadStatus,
    pub error: Option<String>,
    /// The process exit code the failure maps to, when failed.
    pub exit_code: Option<i32>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub quarters: Vec<QuarterSummary>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.quarters
            .iter()
            .all(|quarter| quarter.status == LoadStatus::Success)
    }

    /// The exit code of the first failed quarter, if any failed.
    pub fn failure_exit_code(&self) -> Option<i32> {
        self.quarters
            .iter()
            .find(|quarter| quarter.status != LoadStatus::Success)
            .and_then(|quarter| quarter.exit_code)
    }
}

/// Drives loads against one target store. Quarters are processed strictly
/// sequentially in ascending order; a cancel request is honored at stage
/// boundaries and rolls back the active transaction.
pub struct Orchestrator {
    config: Config,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: Config, cancel: CancellationToken) -> Orchestrator {
        Orchestrator { config, cancel }
    }

    /// Connects the configured backend, discovers the upstream catalog, and
    /// runs the requested load mode end to end.
    pub async fn run(
        &self,
        mode: LoadMode,
        requested: Vec<Quarter>,
    ) -> Result<RunSummary, RuntimeError> {
        let mut backend = loader::connect(&self.config.db).await?;
        backend.prepare_schema().await?;

        let fetcher = Fetcher::new(&self.config.downloader)?;
        let catalog = discover(fetcher.client(), &self.config.downloader.index_url).await?;
        let plan = resolve_plan(backend.as_mut(), mode, &requested, catalog).await?;
        self.execute(backend, &fetcher, mode, plan).await
    }

    /// Runs an already-resolved plan against an already-connected backend.
    pub async fn execute(
        &self,
        mut backend: Box<dyn Loader>,
        fetcher: &Fetcher,
        mode: LoadMode,
        plan: Vec<CatalogEntry>,
    ) -> Result<RunSummary, RuntimeError> {
        let mut summary = RunSummary::default();
        for entry in plan {
            let outcome = self
                .process_quarter(backend.as_mut(), fetcher, mode, &entry)
                .await;
            let failed = outcome.status != LoadStatus::Success;
            summary.quarters.push(outcome);

            // In partial mode quarters are independent; in delta and full
            // mode a failure stops the batch so later quarters never apply
            // on top of a gap.
            if failed && mode != LoadMode::Partial {
                tracing::error!(quarter = %entry.quarter, "quarter failed, skipping the rest of the batch");
                break;
            }
        }
        backend.close().await?;
        Ok(summary)
    }

    async fn process_quarter(
        &self,
        backend: &mut dyn Loader,
        fetcher: &Fetcher,
        mode: LoadMode,
        entry: &CatalogEntry,
    ) -> QuarterSummary {
        let load_id = Uuid::new_v4();
        let quarter = entry.quarter;
        tracing::info!(%quarter, %load_id, %mode, "processing quarter");

        // The STARTED row commits immediately so an interrupted process
        // leaves evidence behind.
        let started = LoadRecord {
            load_id,
            quarter,
            mode: mode.to_string(),
            status: LoadStatus::Started.as_str().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            source_checksum: None,
            error: None,
        };
        if let Err(err) = backend.record_started(&started).await {
            let err = RuntimeError::from(err);
            return QuarterSummary {
                quarter,
                load_id,
                status: LoadStatus::Failed,
                error: Some(err.to_string()),
                exit_code: Some(err.exit_code()),
            };
        }

        let staging_root = self.config.processing.staging_dir.join(load_id.to_string());
        match self
            .quarter_unit_of_work(backend, fetcher, entry, load_id, &staging_root)
            .await
        {
            Ok(()) => {
                self.cleanup_staging(&staging_root, true);
                QuarterSummary {
                    quarter,
                    load_id,
                    status: LoadStatus::Success,
                    error: None,
                    exit_code: None,
                }
            }
            Err(err) => {
                if let Err(rollback_err) = backend.rollback().await {
                    tracing::error!(%quarter, error = %rollback_err, "rollback failed");
                }
                let reason = if err.is_cancelled() {
                    "CANCELLED".to_string()
                } else {
                    err.to_string()
                };
                tracing::error!(%quarter, %load_id, error = %reason, "quarter failed");
                if let Err(meta_err) = backend
                    .record_finished(load_id, LoadStatus::Failed, None, Some(&reason))
                    .await
                {
                    tracing::error!(%quarter, error = %meta_err, "failed to record terminal status");
                }
                self.cleanup_staging(
                    &staging_root,
                    !self.config.processing.keep_staging_on_failure,
                );
                QuarterSummary {
                    quarter,
                    load_id,
                    status: LoadStatus::Failed,
                    error: Some(reason),
                    exit_code: Some(err.exit_code()),
                }
            }
        }
    }

    async fn quarter_unit_of_work(
        &self,
        backend: &mut dyn Loader,
        fetcher: &Fetcher,
        entry: &CatalogEntry,
        load_id: Uuid,
        staging_root: &Path,
    ) -> Result<(), RuntimeError> {
        let quarter = entry.quarter;
        self.check_cancelled()?;

        // Acquire the sealed archive and validate its structure.
        let archive = fetcher.fetch(quarter, &entry.url).await?;
        self.check_cancelled()?;
        let checksum = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || acquire::verify_archive(&archive)).await??
        };
        if let Some(recorded) = backend.latest_success_checksum(quarter).await? {
            if recorded != checksum {
                if self.config.downloader.strict_checksums {
                    return Err(AcquireError::ChecksumMismatch {
                        quarter,
                        recorded,
                        computed: checksum,
                    }
                    .into());
                }
                tracing::warn!(%quarter, %recorded, computed = %checksum, "archive checksum changed upstream");
            }
        }
        self.check_cancelled()?;

        // Parse and stage.
        let parsed = {
            let archive = archive.clone();
            let area = StagingArea::create(
                staging_root.join("staged"),
                self.config.processing.staging_format,
                self.config.processing.chunk_rows,
            )?;
            let policy = self.config.processing.partial_date_policy;
            tokio::task::spawn_blocking(move || parser::parse_archive(&archive, &area, policy))
                .await??
        };
        tracing::info!(
            %quarter,
            nullified = parsed.nullified.len(),
            malformed = parsed.malformed_rows,
            "parse complete"
        );
        self.check_cancelled()?;

        // Deduplicate into the format the backend's bulk path consumes.
        let deduped = {
            let output = StagingArea::create(
                staging_root.join("deduped"),
                backend.bulk_format(),
                self.config.processing.chunk_rows,
            )?;
            let staged = parsed.staged.clone();
            let nullified = parsed.nullified.clone();
            tokio::task::spawn_blocking(move || dedup::deduplicate(&staged, &nullified, &output))
                .await??
        };
        self.check_cancelled()?;

        let counts: Vec<TableCounts> = Table::ALL
            .iter()
            .map(|table| TableCounts {
                table: *table,
                rows_in: parsed.staged.rows_in(*table),
                rows_after_dedup: deduped.rows_after.get(table).copied().unwrap_or(0),
            })
            .collect();
        let sources: Vec<(Table, Vec<PathBuf>)> = Table::ALL
            .iter()
            .map(|table| {
                let files = deduped
                    .tables
                    .get(table)
                    .map(|chunks| chunks.files.clone())
                    .unwrap_or_default();
                (*table, files)
            })
            .collect();
        let nullified_ids: BTreeSet<String> = parsed.nullified.into_inner();

        // One transaction: nullifications first, then the delta merge, the
        // data-quality gate, and the SUCCESS metadata row.
        backend.begin_txn().await?;
        let deleted = backend.delete_cases(&nullified_ids).await?;
        let appended = backend.delta_merge(&sources, &deduped.caseids).await?;
        let report = backend.exec_dq_checks().await?;
        if !report.passed() {
            let failures: Vec<String> = report
                .failures()
                .map(|check| format!("{}: {}", check.name, check.detail))
                .collect();
            return Err(loader::LoadError::DqFailed(failures.join("; ")).into());
        }
        backend.record_row_counts(load_id, &counts).await?;
        backend
            .record_finished(load_id, LoadStatus::Success, Some(&checksum), None)
            .await?;
        backend.commit().await?;

        tracing::info!(%quarter, %load_id, nullified = deleted, appended, "quarter committed");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if self.cancel.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        Ok(())
    }

    fn cleanup_staging(&self, staging_root: &Path, remove: bool) {
        if !remove {
            if staging_root.exists() {
                tracing::info!(path = %staging_root.display(), "keeping staged files for forensics");
            }
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(staging_root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staging_root.display(), error = %err, "failed to remove staging directory");
            }
        }
    }
}

/// Selects and orders the quarters a run will process. Delta takes every
/// advertised quarter after the latest SUCCESS; partial validates the
/// requested set against the catalog; full takes the whole catalog.
pub async fn resolve_plan(
    backend: &mut dyn Loader,
    mode: LoadMode,
    requested: &[Quarter],
    catalog: Vec<CatalogEntry>,
) -> Result<Vec<CatalogEntry>, RuntimeError> {
    match mode {
        LoadMode::Delta => {
            let latest = backend.latest_success_quarter().await?;
            let plan: Vec<CatalogEntry> = catalog
                .into_iter()
                .filter(|entry| latest.map_or(true, |l| entry.quarter > l))
                .collect();
            tracing::info!(
                latest_success = latest.map(|q| q.to_string()).unwrap_or_else(|| "none".to_string()),
                quarters = plan.len(),
                "resolved delta plan"
            );
            Ok(plan)
        }
        LoadMode::Full => Ok(catalog),
        LoadMode::Partial => {
            let wanted: BTreeSet<Quarter> = requested.iter().copied().collect();
            let mut plan = Vec::with_capacity(wanted.len());
            for quarter in wanted {
                let entry = catalog
                    .iter()
                    .find(|entry| entry.quarter == quarter)
                    .cloned()
                    .ok_or(AcquireError::UnknownQuarter(quarter))?;
                plan.push(entry);
            }
            Ok(plan)
        }
    }
}
