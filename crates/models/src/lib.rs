//! Shared value types for the FAERS load pipeline: quarter identifiers, the
//! seven-table catalog, version-ordering keys, and the immutable runtime
//! configuration.

mod config;
mod dates;
mod load;
mod quarter;
mod records;
mod tables;

pub use self::config::{
    Config, ConfigError, DbConfig, DownloaderConfig, LogFormat, LoggingConfig, PartialDatePolicy,
    ProcessingConfig, StagingFormat, DEFAULT_INDEX_URL,
};
pub use self::dates::{normalize_fda_dt, parse_fda_dt, VersionKey};
pub use self::load::{LoadMode, LoadStatus};
pub use self::quarter::{Quarter, QuarterParseError};
pub use self::records::NullificationSet;
pub use self::tables::Table;
