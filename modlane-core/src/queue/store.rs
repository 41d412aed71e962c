//! Whole-snapshot persistence of the ingestion queue.
//!
//! Every mutation rewrites the full snapshot: serialize, write to a temp
//! file in the same directory, fsync, rename over the target. Readers
//! therefore see either the previous or the new snapshot, never a torn one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::entry::QueueEntry;
use crate::error::{IngestError, Result};

pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u16,
    entries: &'a [QueueEntry],
}

#[derive(Deserialize)]
struct Snapshot {
    version: u16,
    entries: Vec<QueueEntry>,
}

/// Result of reading the snapshot file.
#[derive(Debug)]
pub enum StoreLoad {
    /// No snapshot has been written yet.
    Missing,
    Loaded(Vec<QueueEntry>),
    /// The file exists but cannot be interpreted.
    Corrupt(String),
}

#[derive(Clone, Debug)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. I/O failures other than a missing file are
    /// returned as errors; undecodable content is reported as
    /// [`StoreLoad::Corrupt`].
    pub async fn load(&self) -> Result<StoreLoad> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreLoad::Missing),
            Err(err) => {
                return Err(IngestError::Store(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                Ok(StoreLoad::Loaded(snapshot.entries))
            }
            Ok(snapshot) => Ok(StoreLoad::Corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            ))),
            Err(err) => Ok(StoreLoad::Corrupt(err.to_string())),
        }
    }

    /// Atomically replace the snapshot with `entries`.
    pub async fn save(&self, entries: &[QueueEntry]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            entries,
        })?;

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}-{}",
            self.file_name(),
            std::process::id(),
            unique_suffix()
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(IngestError::Store(format!(
                "failed to write {}: {err}",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Move an unreadable snapshot aside so a fresh one can be written.
    /// Returns the backup location.
    pub async fn quarantine(&self) -> Result<PathBuf> {
        let backup = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            self.file_name(),
            chrono::Utc::now().format("%Y%m%dT%H%M%S")
        ));
        tokio::fs::rename(&self.path, &backup).await.map_err(|err| {
            IngestError::Store(format!(
                "failed to move corrupt snapshot {} aside: {err}",
                self.path.display()
            ))
        })?;
        Ok(backup)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "queue".to_string())
    }
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
