//! End-to-end orchestrator scenarios over synthetic archives and the
//! in-memory backend: dedup selection, nullification, failure atomicity,
//! idempotence, and delta resumption.

use acquire::{CatalogEntry, Fetcher};
use loader::memory::{FailPoint, MemoryLoader, MemoryState};
use loader::Loader;
use models::{Config, LoadMode, Quarter, Table};
use runtime::{resolve_plan, Orchestrator};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;
use zip::write::FileOptions;

fn quarter(raw: &str) -> Quarter {
    raw.parse().unwrap()
}

/// Writes a synthetic ASCII release zip into the download directory under
/// the name the fetcher derives from the entry URL, so no network happens.
fn place_archive(download_dir: &Path, q: Quarter, members: &[(&str, &str)]) -> CatalogEntry {
    let filename = format!("faers_ascii_{}.zip", q.to_string().to_lowercase());
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in members {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    let bytes = writer.finish().unwrap().into_inner();

    std::fs::create_dir_all(download_dir).unwrap();
    std::fs::write(download_dir.join(&filename), bytes).unwrap();

    CatalogEntry {
        quarter: q,
        url: Url::parse(&format!("https://fis.fda.gov/content/{filename}")).unwrap(),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
}

impl Harness {
    fn new() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.downloader.download_dir = dir.path().join("downloads");
        config.processing.staging_dir = dir.path().join("staging");
        config.processing.keep_staging_on_failure = false;
        Harness { _dir: dir, config }
    }

    fn download_dir(&self) -> &Path {
        &self.config.downloader.download_dir
    }

    async fn run(
        &self,
        loader: MemoryLoader,
        mode: LoadMode,
        requested: &[Quarter],
        catalog: Vec<CatalogEntry>,
    ) -> (runtime::RunSummary, Arc<Mutex<MemoryState>>) {
        let state = loader.state();
        let mut backend: Box<dyn Loader> = Box::new(loader);
        backend.prepare_schema().await.unwrap();

        let plan = resolve_plan(backend.as_mut(), mode, requested, catalog)
            .await
            .unwrap();
        let fetcher = Fetcher::new(&self.config.downloader).unwrap();
        let orchestrator = Orchestrator::new(self.config.clone(), CancellationToken::new());
        let summary = orchestrator
            .execute(backend, &fetcher, mode, plan)
            .await
            .unwrap();
        (summary, state)
    }
}

fn demo_primaryids(state: &MemoryState) -> Vec<String> {
    let mut ids: Vec<String> = state
        .rows(Table::Demo)
        .iter()
        .map(|row| row[0].clone().unwrap())
        .collect();
    ids.sort();
    ids
}

const DEMO_2023Q1: &str = "primaryid$caseid$fda_dt\n\
                           1001$100$20230115\n\
                           1002$100$20230220\n\
                           1010$101$20230101\n";
const REAC_2023Q1: &str = "primaryid$caseid$pt\n\
                           1001$100$Nausea\n\
                           1002$100$Headache\n\
                           1010$101$Myalgia\n";

#[tokio::test]
async fn single_delta_quarter_keeps_latest_versions() {
    let harness = Harness::new();
    let entry = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", DEMO_2023Q1), ("REAC23Q1.TXT", REAC_2023Q1)],
    );

    let (summary, state) = harness
        .run(MemoryLoader::new(), LoadMode::Delta, &[], vec![entry])
        .await;
    assert!(summary.succeeded());

    let state = state.lock().unwrap();
    assert_eq!(vec!["1002", "1010"], demo_primaryids(&state));
    // The child cascade follows the surviving versions.
    assert_eq!(2, state.rows(Table::Reac).len());

    let history = &state.history;
    assert_eq!(1, history.len());
    assert_eq!("SUCCESS", history[0].status);
    assert_eq!(quarter("2023Q1"), history[0].quarter);
    assert!(history[0].source_checksum.is_some());
}

#[tokio::test]
async fn tie_on_fda_dt_breaks_toward_greater_primaryid() {
    let harness = Harness::new();
    let demo = "primaryid$caseid$fda_dt\n500$200$20230301\n501$200$20230301\n";
    let entry = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", demo)],
    );

    let (summary, state) = harness
        .run(MemoryLoader::new(), LoadMode::Partial, &[quarter("2023Q1")], vec![entry])
        .await;
    assert!(summary.succeeded());
    assert_eq!(vec!["501"], demo_primaryids(&state.lock().unwrap()));
}

#[tokio::test]
async fn nullification_removes_prior_quarters_case() {
    let harness = Harness::new();
    let q1 = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", DEMO_2023Q1), ("REAC23Q1.TXT", REAC_2023Q1)],
    );
    let q2 = place_archive(
        harness.download_dir(),
        quarter("2023Q2"),
        &[(
            "xml/ADR23Q2.xml",
            r#"<ichicsr>
                 <safetyreport>
                   <safetyreportnullification>true</safetyreportnullification>
                   <safetyreportid>100</safetyreportid>
                 </safetyreport>
               </ichicsr>"#,
        )],
    );

    let (summary, state) = harness
        .run(MemoryLoader::new(), LoadMode::Delta, &[], vec![q1, q2])
        .await;
    assert!(summary.succeeded());
    assert_eq!(2, summary.quarters.len());

    let state = state.lock().unwrap();
    // No row for CASEID 100 remains in any table.
    for table in Table::ALL {
        assert!(
            !state.caseids(table).contains("100"),
            "caseid 100 survived in {table}"
        );
    }
    assert_eq!(vec!["1010"], demo_primaryids(&state));
    assert_eq!(1, state.rows(Table::Reac).len());
}

#[tokio::test]
async fn partial_dates_lose_to_full_dates() {
    let harness = Harness::new();
    let demo = "primaryid$caseid$fda_dt\n9001$300$2022\n300315$300$20220315\n";
    let entry = place_archive(
        harness.download_dir(),
        quarter("2022Q1"),
        &[("DEMO22Q1.TXT", demo)],
    );

    let (summary, state) = harness
        .run(MemoryLoader::new(), LoadMode::Partial, &[quarter("2022Q1")], vec![entry])
        .await;
    assert!(summary.succeeded());
    assert_eq!(vec!["300315"], demo_primaryids(&state.lock().unwrap()));
}

#[tokio::test]
async fn mid_merge_failure_rolls_back_and_is_retryable() {
    let harness = Harness::new();
    let entry = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", DEMO_2023Q1), ("REAC23Q1.TXT", REAC_2023Q1)],
    );

    let mut loader = MemoryLoader::new();
    loader.fail_on = Some(FailPoint::BulkLoad(Table::Reac));
    let (summary, state) = harness
        .run(loader, LoadMode::Delta, &[], vec![entry.clone()])
        .await;
    assert!(!summary.succeeded());

    {
        let state = state.lock().unwrap();
        // Bit-identical to before the quarter: no data landed at all.
        for table in Table::ALL {
            assert!(state.rows(table).is_empty(), "{table} has residue");
        }
        // Exactly one terminal FAILED row and no SUCCESS counterpart.
        assert_eq!(1, state.history.len());
        assert_eq!("FAILED", state.history[0].status);
        assert!(state.history[0].error.is_some());
    }

    // With no SUCCESS row recorded, the next delta run against the same
    // metadata selects the same quarter again.
    let retry = MemoryLoader::with_state(Arc::clone(&state));
    let (summary, state) = harness
        .run(retry, LoadMode::Delta, &[], vec![entry])
        .await;
    assert!(summary.succeeded());
    let state = state.lock().unwrap();
    assert_eq!(vec!["1002", "1010"], demo_primaryids(&state));
    assert_eq!(2, state.history.len());
    assert_eq!("SUCCESS", state.history[1].status);
}

#[tokio::test]
async fn rerunning_a_quarter_is_idempotent() {
    let harness = Harness::new();
    let entry = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", DEMO_2023Q1), ("REAC23Q1.TXT", REAC_2023Q1)],
    );

    let loader = MemoryLoader::new();
    let state = loader.state();
    drop(loader);
    let fetcher = Fetcher::new(&harness.config.downloader).unwrap();
    let orchestrator = Orchestrator::new(harness.config.clone(), CancellationToken::new());

    // The same quarter twice in partial mode, against the same target.
    for _ in 0..2 {
        let mut pass: Box<dyn Loader> = Box::new(MemoryLoader::with_state(Arc::clone(&state)));
        pass.prepare_schema().await.unwrap();
        let summary = orchestrator
            .execute(pass, &fetcher, LoadMode::Partial, vec![entry.clone()])
            .await
            .unwrap();
        assert!(summary.succeeded());
    }

    let state = state.lock().unwrap();
    assert_eq!(vec!["1002", "1010"], demo_primaryids(&state));
    assert_eq!(2, state.rows(Table::Reac).len());
    // Two loads, two SUCCESS rows; the latest wins.
    assert_eq!(2, state.history.len());
    assert!(state.history.iter().all(|r| r.status == "SUCCESS"));
}

#[tokio::test]
async fn delta_resumes_after_the_latest_success() {
    let harness = Harness::new();
    let q2 = place_archive(
        harness.download_dir(),
        quarter("2023Q2"),
        &[("DEMO23Q2.TXT", "primaryid$caseid$fda_dt\n2001$200$20230401\n")],
    );
    let q3 = place_archive(
        harness.download_dir(),
        quarter("2023Q3"),
        &[("DEMO23Q3.TXT", "primaryid$caseid$fda_dt\n3001$300$20230701\n")],
    );
    let q4 = place_archive(
        harness.download_dir(),
        quarter("2023Q4"),
        &[("DEMO23Q4.TXT", "primaryid$caseid$fda_dt\n4001$400$20231001\n")],
    );

    // First run lands 2023Q2 only.
    let loader = MemoryLoader::new();
    let state = loader.state();
    let (summary, _) = harness
        .run(loader, LoadMode::Partial, &[quarter("2023Q2")], vec![q2.clone()])
        .await;
    assert!(summary.succeeded());

    // The delta run sees the full catalog and loads Q3 then Q4.
    let loader = MemoryLoader::with_state(Arc::clone(&state));
    let (summary, _) = harness
        .run(loader, LoadMode::Delta, &[], vec![q2, q3, q4])
        .await;
    assert!(summary.succeeded());
    let loaded: Vec<String> = summary
        .quarters
        .iter()
        .map(|q| q.quarter.to_string())
        .collect();
    assert_eq!(vec!["2023Q3", "2023Q4"], loaded);

    let state = state.lock().unwrap();
    let successes = state
        .history
        .iter()
        .filter(|r| r.status == "SUCCESS")
        .count();
    assert_eq!(3, successes);
    assert_eq!(vec!["2001", "3001", "4001"], demo_primaryids(&state));
}

#[tokio::test]
async fn cancellation_fails_the_quarter_with_a_cancelled_reason() {
    let harness = Harness::new();
    let entry = place_archive(
        harness.download_dir(),
        quarter("2023Q1"),
        &[("DEMO23Q1.TXT", DEMO_2023Q1)],
    );

    let loader = MemoryLoader::new();
    let state = loader.state();
    let mut backend: Box<dyn Loader> = Box::new(loader);
    backend.prepare_schema().await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let orchestrator = Orchestrator::new(harness.config.clone(), cancel);
    let fetcher = Fetcher::new(&harness.config.downloader).unwrap();
    let summary = orchestrator
        .execute(backend, &fetcher, LoadMode::Delta, vec![entry])
        .await
        .unwrap();

    assert!(!summary.succeeded());
    assert_eq!(Some("CANCELLED".to_string()), summary.quarters[0].error);
    let state = state.lock().unwrap();
    assert_eq!("FAILED", state.history[0].status);
    assert_eq!(Some("CANCELLED".to_string()), state.history[0].error);
    assert!(state.rows(Table::Demo).is_empty());
}
