use crate::AcquireError;
use exponential_backoff::Backoff;
use futures::StreamExt;
use models::{DownloaderConfig, Quarter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// A retrying HTTP session that lands archives in the download directory.
/// Downloads stream to a `.part` path and are renamed into place only when
/// complete, so a partially written file never masquerades as an archive.
pub struct Fetcher {
    client: reqwest::Client,
    download_dir: PathBuf,
    retries: u32,
    backoff: Backoff,
}

impl Fetcher {
    pub fn new(config: &DownloaderConfig) -> Result<Fetcher, AcquireError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("faersctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        // The spec floor for the backoff factor is 0.3 seconds.
        let min = Duration::from_secs_f64(config.backoff_factor.max(0.3));
        let backoff = Backoff::new(config.retries.max(1), min, Some(Duration::from_secs(300)));
        Ok(Fetcher {
            client,
            download_dir: config.download_dir.clone(),
            retries: config.retries.max(1),
            backoff,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches one quarter's archive, reusing an already-complete download
    /// when present.
    pub async fn fetch(&self, quarter: Quarter, url: &Url) -> Result<PathBuf, AcquireError> {
        let path = self.download_dir.join(archive_filename(quarter, url));
        if path.is_file() {
            tracing::info!(%quarter, path = %path.display(), "reusing existing archive");
            return Ok(path);
        }
        tokio::fs::create_dir_all(&self.download_dir).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_download(url, &path).await {
                Ok(()) => {
                    tracing::info!(%quarter, url = %url, path = %path.display(), "downloaded archive");
                    return Ok(path);
                }
                Err(err) if err.is_retryable() && attempt <= self.retries => {
                    // Backoff::next is None once attempts are exhausted.
                    match self.backoff.next(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                %quarter,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "download failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            return Err(AcquireError::Unreachable {
                                attempts: attempt,
                                source: Box::new(err),
                            })
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    return Err(AcquireError::Unreachable {
                        attempts: attempt,
                        source: Box::new(err),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_download(&self, url: &Url, path: &Path) -> Result<(), AcquireError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Status {
                status,
                url: url.clone(),
            });
        }

        let part = path.with_extension("zip.part");
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok::<(), AcquireError>(())
        }
        .await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&part, path).await?;
                Ok(())
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(err)
            }
        }
    }
}

fn archive_filename(quarter: Quarter, url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("faers_{quarter}.zip"))
}
