//! Decides when a freshly downloaded file is safe to read.
//!
//! Browsers and download managers create the target file long before the
//! last byte lands, and many keep it open the whole time. A file counts as
//! stable once it can be opened (without sharing, on Windows) and its size
//! does not change across a short sample window.

use std::io::ErrorKind;
use std::path::Path;

use tokio::time::sleep;
use tracing::debug;

use crate::config::StabilityConfig;
use crate::error::{IngestError, Result, TransientFileReason};

/// Outcome of a successful probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StableFile {
    pub size: u64,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
}

#[derive(Clone, Debug)]
pub struct StabilityProbe {
    config: StabilityConfig,
}

impl StabilityProbe {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    /// Probe `path` until it is stable or the attempt budget runs out.
    ///
    /// The final failure is reported as [`IngestError::TransientFile`]
    /// carrying the reason seen on the last attempt.
    pub async fn wait_until_stable(&self, path: &Path) -> Result<StableFile> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_reason = TransientFileReason::Missing;

        for attempt in 1..=max_attempts {
            match self.probe_once(path).await {
                Ok(size) => {
                    return Ok(StableFile {
                        size,
                        attempts: attempt,
                    });
                }
                Err(reason) => {
                    debug!(
                        path = %path.display(),
                        attempt,
                        %reason,
                        "file not stable yet"
                    );
                    last_reason = reason;
                }
            }

            if attempt < max_attempts {
                sleep(self.config.backoff(attempt)).await;
            }
        }

        Err(IngestError::TransientFile {
            path: path.to_path_buf(),
            reason: last_reason,
        })
    }

    /// Cheap existence check used when re-validating persisted entries.
    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn probe_once(&self, path: &Path) -> std::result::Result<u64, TransientFileReason> {
        let before = file_size(path).await?;

        let handle = open_exclusive(path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => TransientFileReason::Missing,
            _ => TransientFileReason::Locked,
        })?;
        drop(handle);

        sleep(self.config.sample_window()).await;

        let after = file_size(path).await?;
        if before != after {
            return Err(TransientFileReason::Growing);
        }
        Ok(after)
    }
}

async fn file_size(path: &Path) -> std::result::Result<u64, TransientFileReason> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(TransientFileReason::Missing),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(TransientFileReason::Missing),
        Err(_) => Err(TransientFileReason::Locked),
    }
}

#[cfg(windows)]
async fn open_exclusive(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .read(true)
        .share_mode(0)
        .open(path)
        .await
}

#[cfg(not(windows))]
async fn open_exclusive(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new().read(true).open(path).await
}
