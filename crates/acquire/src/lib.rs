//! Archive acquisition: scraping the upstream catalog, fetching release
//! archives with a retrying HTTP session, and validating what arrived.

mod catalog;
mod fetch;
mod integrity;

pub use self::catalog::{discover, parse_catalog, CatalogEntry};
pub use self::fetch::Fetcher;
pub use self::integrity::verify_archive;

use models::Quarter;
use std::io;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: Url,
    },

    #[error("upstream unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: Box<AcquireError>,
    },

    #[error("download i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid url in catalog: {0}")]
    Url(#[from] url::ParseError),

    #[error("archive structure unreadable: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive corrupt at member '{member}': {detail}")]
    ArchiveCorrupt { member: String, detail: String },

    #[error("checksum mismatch for {quarter}: recorded {recorded}, computed {computed}")]
    ChecksumMismatch {
        quarter: Quarter,
        recorded: String,
        computed: String,
    },

    #[error("quarter {0} is not advertised by the upstream catalog")]
    UnknownQuarter(Quarter),
}

impl AcquireError {
    /// Transient failures worth another attempt: transport errors, read
    /// errors mid-download, and the upstream's 5xx gateway statuses.
    pub(crate) fn is_retryable(&self) -> bool {
        match self {
            AcquireError::Http(err) => !err.is_builder(),
            AcquireError::Status { status, .. } => {
                matches!(status.as_u16(), 500 | 502 | 503 | 504)
            }
            AcquireError::Io(_) => true,
            _ => false,
        }
    }
}
