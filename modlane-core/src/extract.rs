//! Archive extraction into per-entry working directories.
//!
//! Zip archives are unpacked in-process with the `zip` crate. 7z and rar go
//! through an external `7z` binary, which handles solid archives and RAR5
//! far better than the pure Rust readers. Either way, output lands in a
//! hidden staging directory beside the destination and is only renamed into
//! place once extraction succeeded, so a failure never leaves a
//! half-populated directory behind.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::classify::{ArchiveFormat, archive_format};
use crate::config::ExtractionConfig;
use crate::error::{IngestError, Result};

#[derive(Clone, Debug)]
pub struct ArchiveExtractor {
    config: ExtractionConfig,
}

impl ArchiveExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract `archive` into `destination` and return every extracted file,
    /// sorted by path.
    pub async fn extract(&self, archive: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
        self.extract_with_progress(archive, destination, |_| {})
            .await
    }

    /// Like [`ArchiveExtractor::extract`], reporting percentage progress.
    pub async fn extract_with_progress<F>(
        &self,
        archive: &Path,
        destination: &Path,
        progress: F,
    ) -> Result<Vec<PathBuf>>
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let format = archive_format(archive)
            .ok_or_else(|| IngestError::extraction(archive, "unsupported archive format"))?;

        let parent = destination
            .parent()
            .ok_or_else(|| IngestError::extraction(archive, "destination has no parent"))?;
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            IngestError::extraction(
                archive,
                format!("destination {} not writable: {err}", parent.display()),
            )
        })?;

        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            debug!(path = %destination.display(), "removing stale extraction output");
            tokio::fs::remove_dir_all(destination).await?;
        }

        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(parent)
            .map_err(|err| {
                IngestError::extraction(
                    archive,
                    format!("destination {} not writable: {err}", parent.display()),
                )
            })?;

        let progress = Arc::new(progress);
        (*progress)(0);
        match format {
            ArchiveFormat::Zip => {
                let archive_path = archive.to_path_buf();
                let staging_path = staging.path().to_path_buf();
                let report = Arc::clone(&progress);
                spawn_blocking(move || {
                    extract_zip(&archive_path, &staging_path, |pct| (*report)(pct))
                })
                .await
                .map_err(|err| {
                    IngestError::extraction(archive, format!("extraction task failed: {err}"))
                })??;
            }
            ArchiveFormat::SevenZip | ArchiveFormat::Rar => {
                self.extract_with_7z(archive, staging.path()).await?;
            }
        }

        // Hand ownership of the staging dir to the rename; clean it up by hand
        // if the rename itself fails.
        let staged = staging.keep();
        if let Err(err) = tokio::fs::rename(&staged, destination).await {
            let _ = tokio::fs::remove_dir_all(&staged).await;
            return Err(IngestError::extraction(
                archive,
                format!("failed to move output into {}: {err}", destination.display()),
            ));
        }
        (*progress)(100);

        let root = destination.to_path_buf();
        let files = spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|err| IngestError::extraction(archive, format!("listing failed: {err}")))??;
        debug!(
            archive = %archive.display(),
            count = files.len(),
            "archive extracted"
        );
        Ok(files)
    }

    async fn extract_with_7z(&self, archive: &Path, staging: &Path) -> Result<()> {
        let mut output_flag = std::ffi::OsString::from("-o");
        output_flag.push(staging.as_os_str());

        let output = Command::new(&self.config.seven_zip_binary)
            .arg("x")
            .arg("-y")
            .arg("-bd")
            .arg(output_flag)
            .arg(archive)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                IngestError::extraction(
                    archive,
                    format!(
                        "failed to run {}: {err}",
                        self.config.seven_zip_binary.display()
                    ),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no diagnostic output").trim();
            return Err(IngestError::extraction(
                archive,
                format!("7z exited with {}: {detail}", output.status),
            ));
        }
        Ok(())
    }
}

fn extract_zip(archive: &Path, target: &Path, progress: impl Fn(u8)) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|err| IngestError::extraction(archive, format!("corrupt archive: {err}")))?;

    let total = zip.len().max(1);
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| IngestError::extraction(archive, format!("corrupt entry: {err}")))?;

        let Some(relative) = entry.enclosed_name() else {
            warn!(
                archive = %archive.display(),
                entry = entry.name(),
                "skipping archive entry outside the extraction root"
            );
            continue;
        };
        let output_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
        } else {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&output_path)?;
            std::io::copy(&mut entry, &mut outfile).map_err(|err| {
                IngestError::extraction(
                    archive,
                    format!(
                        "failed to write {}: {err}",
                        relative_display(&output_path, target)
                    ),
                )
            })?;
        }

        let pct = ((index + 1) * 100 / total).min(99) as u8;
        progress(pct);
    }
    Ok(())
}

fn relative_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}
