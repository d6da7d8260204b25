mod logging;

use acquire::{CatalogEntry, Fetcher};
use clap::Parser;
use models::{Config, LoadMode, Quarter};
use runtime::{Orchestrator, RuntimeError};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// faersctl loads FDA FAERS quarterly releases into a relational store.
#[derive(Debug, Parser)]
#[clap(author, name = "faersctl", version)]
struct Faersctl {
    /// Path to the YAML configuration file.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Named database profile from the configuration file.
    #[clap(long, global = true)]
    profile: Option<String>,

    #[clap(flatten)]
    log_args: logging::LogArgs,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Subcommand {
    /// Manage the target store and inspect loaded state
    #[clap(subcommand)]
    Db(DbCommand),
    /// Acquire quarterly archives without loading them
    Download(DownloadArgs),
    /// Execute a load run
    Run(RunArgs),
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum DbCommand {
    /// Create the FAERS tables and process-metadata tables if absent
    Init,
    /// Run the data-quality checks against loaded state
    Verify,
    /// Print the load history
    History(HistoryArgs),
}

#[derive(Debug, clap::Args)]
struct HistoryArgs {
    /// Restrict to one quarter, e.g. 2023Q1.
    #[clap(long)]
    quarter: Option<Quarter>,
}

#[derive(Debug, clap::Args)]
struct DownloadArgs {
    /// Quarter to download; repeatable. Defaults to the latest advertised.
    #[clap(long = "quarter")]
    quarters: Vec<Quarter>,

    /// List the advertised catalog instead of downloading.
    #[clap(long)]
    list: bool,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Load mode.
    #[clap(long, value_enum)]
    mode: Mode,

    /// Quarter to load; repeatable. Required for partial mode.
    #[clap(long = "quarter", required_if_eq("mode", "partial"))]
    quarters: Vec<Quarter>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Mode {
    Delta,
    Partial,
    Full,
}

impl From<Mode> for LoadMode {
    fn from(mode: Mode) -> LoadMode {
        match mode {
            Mode::Delta => LoadMode::Delta,
            Mode::Partial => LoadMode::Partial,
            Mode::Full => LoadMode::Full,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Faersctl::parse();

    let config = match Config::load(cli.config.as_deref(), cli.profile.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };
    logging::init_logging(&cli.log_args, &config.logging);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("cancel requested, stopping at the next stage boundary");
                cancel.cancel();
            }
        });
    }

    if let Err(err) = execute(cli.subcommand, config, cancel).await {
        tracing::error!(error = %err, "command failed");
        std::process::exit(err.exit_code());
    }
}

async fn execute(
    subcommand: Subcommand,
    config: Config,
    cancel: CancellationToken,
) -> Result<(), RuntimeError> {
    match subcommand {
        Subcommand::Db(DbCommand::Init) => {
            let mut backend = loader::connect(&config.db).await?;
            backend.prepare_schema().await?;
            backend.close().await?;
            println!("schema ready");
            Ok(())
        }
        Subcommand::Db(DbCommand::Verify) => {
            let mut backend = loader::connect(&config.db).await?;
            let report = backend.exec_dq_checks().await?;
            backend.close().await?;
            for check in &report.checks {
                let status = if check.passed { "PASS" } else { "FAIL" };
                println!("{status}  {:24}  {}", check.name, check.detail);
            }
            if report.passed() {
                Ok(())
            } else {
                Err(loader::LoadError::DqFailed("one or more checks failed".to_string()).into())
            }
        }
        Subcommand::Db(DbCommand::History(args)) => {
            let mut backend = loader::connect(&config.db).await?;
            let records = backend.history(args.quarter).await?;
            backend.close().await?;
            for record in records {
                println!(
                    "{}  {}  {:7}  {:11}  {}  {}",
                    record.load_id,
                    record.quarter,
                    record.mode,
                    record.status,
                    record.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
                    record.error.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Subcommand::Download(args) => download(args, &config).await,
        Subcommand::Run(args) => {
            let orchestrator = Orchestrator::new(config, cancel);
            let summary = orchestrator.run(args.mode.into(), args.quarters).await?;
            for quarter in &summary.quarters {
                println!(
                    "{}  {:7}  {}",
                    quarter.quarter,
                    quarter.status,
                    quarter.error.as_deref().unwrap_or("-"),
                );
            }
            if !summary.succeeded() {
                std::process::exit(summary.failure_exit_code().unwrap_or(5));
            }
            Ok(())
        }
    }
}

async fn download(args: DownloadArgs, config: &Config) -> Result<(), RuntimeError> {
    let fetcher = Fetcher::new(&config.downloader)?;
    let catalog = acquire::discover(fetcher.client(), &config.downloader.index_url).await?;

    if args.list {
        for entry in &catalog {
            println!("{}  {}", entry.quarter, entry.url);
        }
        return Ok(());
    }

    let targets: Vec<CatalogEntry> = if args.quarters.is_empty() {
        catalog.last().cloned().into_iter().collect()
    } else {
        let mut targets = Vec::with_capacity(args.quarters.len());
        for quarter in args.quarters {
            let entry = catalog
                .iter()
                .find(|entry| entry.quarter == quarter)
                .cloned()
                .ok_or(acquire::AcquireError::UnknownQuarter(quarter))?;
            targets.push(entry);
        }
        targets
    };

    for entry in targets {
        let path = fetcher.fetch(entry.quarter, &entry.url).await?;
        let verify_path = path.clone();
        let checksum =
            tokio::task::spawn_blocking(move || acquire::verify_archive(&verify_path)).await??;
        println!("{}  {}  sha256:{}", entry.quarter, path.display(), checksum);
    }
    Ok(())
}
