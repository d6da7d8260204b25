use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default upstream catalog: the FDA's quarterly data extract index page.
pub const DEFAULT_INDEX_URL: &str =
    "https://fis.fda.gov/extensions/FPD-QDE-FAERS/FPD-QDE-FAERS.html";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown profile: '{0}'")]
    UnknownProfile(String),

    #[error("invalid value in {var}: {detail}")]
    InvalidEnv { var: String, detail: String },
}

/// The immutable configuration passed into the orchestrator. Precedence is
/// environment variables over file values over built-in defaults; named
/// profiles select among target-database configurations within one file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub db: DbConfig,
    pub downloader: DownloaderConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
    pub profiles: BTreeMap<String, DbConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DbConfig {
    /// Backend registry entry, e.g. `postgresql`.
    pub r#type: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Usually supplied via `FAERS_DB_PASSWORD` rather than the file.
    pub password: Option<String>,
    pub dbname: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            r#type: "postgresql".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            dbname: "faers".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DownloaderConfig {
    pub index_url: String,
    pub download_dir: PathBuf,
    pub retries: u32,
    pub backoff_factor: f64,
    pub strict_checksums: bool,
    pub timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            index_url: DEFAULT_INDEX_URL.to_string(),
            download_dir: PathBuf::from("downloads"),
            retries: 5,
            backoff_factor: 0.3,
            strict_checksums: false,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProcessingConfig {
    pub staging_format: StagingFormat,
    pub staging_dir: PathBuf,
    pub partial_date_policy: PartialDatePolicy,
    /// Rows buffered in memory before a staged chunk is flushed.
    pub chunk_rows: usize,
    pub keep_staging_on_failure: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            staging_format: StagingFormat::Parquet,
            staging_dir: PathBuf::from("staging"),
            partial_date_policy: PartialDatePolicy::Raw,
            chunk_rows: 50_000,
            keep_staging_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// An env-filter directive, e.g. `info` or `debug,sqlx=warn`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingFormat {
    Parquet,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PartialDatePolicy {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "pad-with-01")]
    PadWith01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Loads configuration from an optional YAML file, applies the named
    /// profile's database section, then applies environment overrides.
    pub fn load(path: Option<&Path>, profile: Option<&str>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_yaml::from_str(&raw)?
            }
            None => Config::default(),
        };

        if let Some(name) = profile {
            config.db = config
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
        }

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_var("FAERS_DB_TYPE") {
            self.db.r#type = v;
        }
        if let Some(v) = env_var("FAERS_DB_HOST") {
            self.db.host = v;
        }
        if let Some(v) = env_var("FAERS_DB_PORT") {
            self.db.port = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "FAERS_DB_PORT".to_string(),
                detail: format!("'{v}' is not a port number"),
            })?;
        }
        if let Some(v) = env_var("FAERS_DB_USER") {
            self.db.user = v;
        }
        if let Some(v) = env_var("FAERS_DB_PASSWORD") {
            self.db.password = Some(v);
        }
        if let Some(v) = env_var("FAERS_DB_DBNAME") {
            self.db.dbname = v;
        }
        if let Some(v) = env_var("FAERS_DOWNLOAD_DIR") {
            self.downloader.download_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("FAERS_STAGING_DIR") {
            self.processing.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("FAERS_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
