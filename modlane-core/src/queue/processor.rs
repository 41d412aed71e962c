//! The ingestion queue and its single-consumer processing loop.
//!
//! Entries move `Pending → Stabilizing → Classified → (Extracting) →
//! ReadyForInstall` and are dropped from the queue once their completion
//! event went out, or end in `Failed` and stay until discarded. Each
//! transition is persisted before the next step starts, so a crash loses at
//! most the step that was running.
//!
//! Renames can arrive while an entry is mid-flight. A step copies the
//! entry's current path once when it starts and works on that copy; the
//! next step picks up whatever the path is by then. An entry whose file was
//! renamed away while it was being probed starts over at the new path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use modlane_contracts::status::TaskStatus;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::IngestSink;
use super::entry::{EntryId, EntryState, QueueEntry};
use super::events::QueueEvent;
use super::store::{QueueStore, StoreLoad};
use crate::classify::{FileKind, classify};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::extract::ArchiveExtractor;
use crate::stability::StabilityProbe;
use crate::status::StatusSink;

const EXTRACT_PROGRESS_MESSAGE: &str = "Extracting files...";

/// What [`FileQueueProcessor::load_state`] recovered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries put back in line for processing.
    pub restored: usize,
    /// Entries that are (or became) failed.
    pub failed: usize,
    /// Backup location when a corrupt snapshot was moved aside.
    pub quarantined: Option<PathBuf>,
}

#[derive(Default)]
struct QueueState {
    /// Discovery order.
    entries: Vec<QueueEntry>,
}

impl QueueState {
    fn by_id_mut(&mut self, id: &EntryId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|entry| &entry.id == id)
    }

    fn position_by_path(&self, path: &Path) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.current_path == path)
    }

    /// Append a new entry for `path` with an id no live entry holds.
    fn admit(&mut self, path: PathBuf) -> QueueEntry {
        let mut entry = QueueEntry::new(path);
        let mut salt = 0;
        while self.entries.iter().any(|existing| existing.id == entry.id) {
            salt += 1;
            entry.id = EntryId::derive(&entry.original_path, entry.discovered_at, salt);
        }
        self.entries.push(entry.clone());
        entry
    }

    fn remove(&mut self, id: &EntryId) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|entry| &entry.id == id)?;
        Some(self.entries.remove(index))
    }
}

struct Inner {
    config: IngestConfig,
    store: QueueStore,
    state: Mutex<QueueState>,
    wake: Notify,
    events: broadcast::Sender<QueueEvent>,
    status: Arc<dyn StatusSink>,
    probe: StabilityProbe,
    extractor: ArchiveExtractor,
    running: AtomicBool,
}

/// Handle to the ingestion queue. Cheap to clone; all clones share one
/// queue.
#[derive(Clone)]
pub struct FileQueueProcessor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FileQueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("FileQueueProcessor");
        debug
            .field("state_path", &self.inner.store.path())
            .field("running", &self.inner.running.load(Ordering::Relaxed));
        match self.inner.state.try_lock() {
            Ok(guard) => debug.field("entries", &guard.entries.len()),
            Err(_) => debug.field("entries", &"<locked>"),
        };
        debug.finish()
    }
}

impl FileQueueProcessor {
    pub fn new(config: IngestConfig, status: Arc<dyn StatusSink>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                store: QueueStore::new(config.state_path.clone()),
                probe: StabilityProbe::new(config.stability),
                extractor: ArchiveExtractor::new(config.extraction.clone()),
                state: Mutex::new(QueueState::default()),
                wake: Notify::new(),
                running: AtomicBool::new(false),
                events,
                status,
                config,
            }),
        }
    }

    /// Receive `FileMoved` / `FilesExtracted` completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of every entry, in discovery order.
    pub async fn snapshot(&self) -> Vec<QueueEntry> {
        self.inner.state.lock().await.entries.clone()
    }

    /// Working directory used when extracting the entry `id`.
    pub fn work_dir_for(&self, id: &EntryId) -> PathBuf {
        self.inner.config.work_dir.join(id.as_str())
    }

    /// Admit `path` into the queue.
    ///
    /// Unsupported extensions are rejected before anything is stored. A path
    /// that is already queued is left alone, unless its entry failed, in
    /// which case it starts over at the back of the queue.
    pub async fn enqueue_file(&self, path: impl Into<PathBuf>) -> Result<QueueEntry> {
        let path = path.into();
        if classify(&path) == FileKind::Unsupported {
            debug!(path = %path.display(), "ignoring unsupported file");
            return Err(IngestError::UnsupportedInput(path));
        }

        let mut state = self.inner.state.lock().await;
        let entry = match state.position_by_path(&path) {
            Some(index) if state.entries[index].state == EntryState::Failed => {
                let mut entry = state.entries.remove(index);
                entry.reset();
                state.entries.push(entry.clone());
                info!(entry_id = %entry.id, path = %path.display(), "re-queued failed entry");
                entry
            }
            Some(index) => return Ok(state.entries[index].clone()),
            None => {
                let entry = state.admit(path.clone());
                info!(entry_id = %entry.id, path = %path.display(), "queued file");
                entry
            }
        };

        self.inner.store.save(&state.entries).await?;
        drop(state);

        self.inner.status.current_task(
            TaskStatus::InProgress,
            &format!("Queued: {}", entry.display_name()),
        );
        self.inner.wake.notify_one();
        Ok(entry)
    }

    /// Point the entry queued under `old` at `new`, keeping its id and state.
    pub async fn rename_file_in_queue(
        &self,
        old: &Path,
        new: &Path,
    ) -> Result<Option<QueueEntry>> {
        let mut state = self.inner.state.lock().await;
        let Some(index) = state.position_by_path(old) else {
            return Ok(None);
        };

        // Something else was queued at the destination; it has just been
        // overwritten by the move.
        if old != new
            && let Some(stale) = state.position_by_path(new)
        {
            let removed = state.entries.remove(stale);
            warn!(
                entry_id = %removed.id,
                path = %new.display(),
                "dropping entry replaced by a moved file"
            );
            self.remove_work_dir(&removed.id).await;
        }

        let index = state.position_by_path(old).unwrap_or(index);
        let entry = &mut state.entries[index];
        entry.current_path = new.to_path_buf();
        let updated = entry.clone();
        debug!(
            entry_id = %updated.id,
            from = %old.display(),
            to = %new.display(),
            "followed rename"
        );

        self.inner.store.save(&state.entries).await?;
        Ok(Some(updated))
    }

    /// Remove a failed entry from the queue and the snapshot.
    pub async fn discard(&self, id: &EntryId) -> Result<QueueEntry> {
        let mut state = self.inner.state.lock().await;
        let entry = state
            .entries
            .iter()
            .find(|entry| &entry.id == id)
            .ok_or_else(|| IngestError::NotFound(id.to_string()))?;
        if entry.state != EntryState::Failed {
            return Err(IngestError::InvalidState(format!(
                "entry {id} is {:?}; only failed entries can be discarded",
                entry.state
            )));
        }

        let removed = state
            .remove(id)
            .ok_or_else(|| IngestError::NotFound(id.to_string()))?;
        self.inner.store.save(&state.entries).await?;
        info!(entry_id = %id, "discarded failed entry");
        Ok(removed)
    }

    /// Write the full queue snapshot.
    pub async fn persist_state(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        self.inner.store.save(&state.entries).await
    }

    /// Rebuild the queue from the persisted snapshot.
    ///
    /// Unfinished entries are checked against the filesystem first: those
    /// whose file is still there start over as `Pending`, the rest fail.
    /// Leftovers of an interrupted extraction are removed.
    pub async fn load_state(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        let loaded = match self.inner.store.load().await {
            Ok(StoreLoad::Missing) => Vec::new(),
            Ok(StoreLoad::Loaded(entries)) => entries,
            Ok(StoreLoad::Corrupt(reason)) => {
                warn!(path = %self.inner.store.path().display(), %reason, "queue snapshot is corrupt");
                match self.inner.store.quarantine().await {
                    Ok(backup) => {
                        self.inner.status.current_task(
                            TaskStatus::Failed,
                            &format!(
                                "Saved queue was unreadable and has been reset (backup at {})",
                                backup.display()
                            ),
                        );
                        report.quarantined = Some(backup);
                        Vec::new()
                    }
                    Err(err) => return Err(self.fatal_load(err)),
                }
            }
            Err(err) => return Err(self.fatal_load(err)),
        };

        let mut recovered: Vec<QueueEntry> = Vec::with_capacity(loaded.len());
        for mut entry in loaded {
            if recovered.iter().any(|existing| {
                existing.current_path == entry.current_path || existing.id == entry.id
            }) {
                warn!(entry_id = %entry.id, "dropping duplicate persisted entry");
                continue;
            }

            if entry.state != EntryState::Failed {
                if entry.state == EntryState::Extracting {
                    self.remove_work_dir(&entry.id).await;
                }
                if self.inner.probe.exists(&entry.current_path).await {
                    entry.state = EntryState::Pending;
                    entry.kind = None;
                    entry.attempts = 0;
                } else {
                    entry.fail("file disappeared before processing");
                }
            }

            if entry.state == EntryState::Failed {
                report.failed += 1;
            } else {
                report.restored += 1;
            }
            recovered.push(entry);
        }
        recovered.sort_by_key(|entry| entry.discovered_at);

        let mut state = self.inner.state.lock().await;
        let live = std::mem::take(&mut state.entries);
        for entry in live {
            if !recovered.iter().any(|existing| {
                existing.current_path == entry.current_path || existing.id == entry.id
            }) {
                recovered.push(entry);
            }
        }
        state.entries = recovered;
        self.inner.store.save(&state.entries).await?;
        drop(state);

        info!(
            restored = report.restored,
            failed = report.failed,
            "queue state loaded"
        );
        self.inner.wake.notify_one();
        Ok(report)
    }

    /// Spawn the processing loop. Only one loop may run per queue.
    ///
    /// Cancelling `cancel` lets the loop finish the entry it is working on
    /// and exit.
    pub fn start_processing(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(IngestError::InvalidState(
                "processing loop already running".into(),
            ));
        }

        let processor = self.clone();
        Ok(tokio::spawn(async move {
            info!("queue processing started");
            while !cancel.is_cancelled() {
                if processor.process_next().await {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = processor.inner.wake.notified() => {}
                }
            }
            processor.inner.running.store(false, Ordering::SeqCst);
            info!("queue processing stopped");
        }))
    }

    /// Drive the oldest pending entry as far as it goes. Returns `false`
    /// when nothing was pending.
    async fn process_next(&self) -> bool {
        let Some((id, path, name)) = self.claim_next().await else {
            return false;
        };
        self.inner.status.current_task(
            TaskStatus::InProgress,
            &format!("Waiting for {name} to finish downloading"),
        );

        let stable = match self.inner.probe.wait_until_stable(&path).await {
            Ok(stable) => stable,
            Err(err) => {
                if !self.restart_if_moved(&id, &path).await {
                    self.fail(&id, err).await;
                }
                return true;
            }
        };
        let kind = {
            let mut state = self.inner.state.lock().await;
            let Some(entry) = state.by_id_mut(&id) else {
                return true;
            };
            entry.attempts = stable.attempts;
            let kind = classify(&entry.current_path);
            entry.kind = Some(kind);
            entry.state = EntryState::Classified;
            self.save_logged(&state).await;
            kind
        };
        match kind {
            FileKind::ModFile => self.finish_mod_file(&id).await,
            FileKind::Archive => self.extract_archive(&id).await,
            FileKind::Unsupported => {
                self.fail(&id, "file was renamed to an unsupported type")
                    .await
            }
        }
        true
    }

    async fn claim_next(&self) -> Option<(EntryId, PathBuf, String)> {
        let mut state = self.inner.state.lock().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.state == EntryState::Pending)?;
        entry.state = EntryState::Stabilizing;
        let claimed = (
            entry.id.clone(),
            entry.current_path.clone(),
            entry.display_name(),
        );
        self.save_logged(&state).await;
        debug!(entry_id = %claimed.0, path = %claimed.1.display(), "processing entry");
        Some(claimed)
    }

    /// Put the entry back to `Pending` if it no longer lives at `read_from`.
    async fn restart_if_moved(&self, id: &EntryId, read_from: &Path) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(entry) = state.by_id_mut(id) else {
            return false;
        };
        if entry.current_path == read_from {
            return false;
        }
        entry.state = EntryState::Pending;
        let path = entry.current_path.clone();
        self.save_logged(&state).await;
        debug!(entry_id = %id, path = %path.display(), "restarting moved entry");
        true
    }

    async fn finish_mod_file(&self, id: &EntryId) {
        let mut state = self.inner.state.lock().await;
        let Some(entry) = state.by_id_mut(id) else {
            return;
        };
        entry.state = EntryState::ReadyForInstall;
        let event = QueueEvent::FileMoved {
            entry_id: id.clone(),
            source: entry.original_path.clone(),
            destination: entry.current_path.clone(),
        };
        let name = entry.display_name();
        self.save_logged(&state).await;

        self.publish(event);
        state.remove(id);
        self.save_logged(&state).await;
        drop(state);

        info!(entry_id = %id, "mod file ready for install");
        self.inner
            .status
            .current_task(TaskStatus::Completed, &format!("Ready to install: {name}"));
    }

    async fn extract_archive(&self, id: &EntryId) {
        let (path, name) = {
            let mut state = self.inner.state.lock().await;
            let Some(entry) = state.by_id_mut(id) else {
                return;
            };
            entry.state = EntryState::Extracting;
            let copied = (entry.current_path.clone(), entry.display_name());
            self.save_logged(&state).await;
            copied
        };

        self.inner
            .status
            .current_task(TaskStatus::InProgress, &format!("Extracting {name}"));

        let destination = self.work_dir_for(id);
        let status = Arc::clone(&self.inner.status);
        let extracted = self
            .inner
            .extractor
            .extract_with_progress(&path, &destination, move |pct| {
                status.progress(pct, EXTRACT_PROGRESS_MESSAGE)
            })
            .await;

        let files = match extracted {
            Ok(files) => files,
            Err(err) => {
                self.fail(id, err).await;
                return;
            }
        };

        let mod_files: Vec<PathBuf> = files
            .into_iter()
            .filter(|file| classify(file) == FileKind::ModFile)
            .collect();
        if mod_files.is_empty() {
            self.remove_work_dir(id).await;
            self.fail(id, "archive contains no supported mod files")
                .await;
            return;
        }

        let count = mod_files.len();
        let mut state = self.inner.state.lock().await;
        let Some(entry) = state.by_id_mut(id) else {
            // Dropped while extracting.
            drop(state);
            self.remove_work_dir(id).await;
            return;
        };
        entry.state = EntryState::ReadyForInstall;
        self.save_logged(&state).await;

        self.publish(QueueEvent::FilesExtracted {
            entry_id: id.clone(),
            archive_name: name.clone(),
            files: mod_files,
        });
        state.remove(id);
        self.save_logged(&state).await;
        drop(state);

        info!(entry_id = %id, count, "archive extracted and ready for install");
        self.inner.status.current_task(
            TaskStatus::Completed,
            &format!("Extracted {count} mod file(s) from {name}"),
        );
    }

    async fn fail(&self, id: &EntryId, reason: impl std::fmt::Display) {
        let reason = reason.to_string();
        let mut state = self.inner.state.lock().await;
        let Some(entry) = state.by_id_mut(id) else {
            return;
        };
        entry.fail(&reason);
        let name = entry.display_name();
        self.save_logged(&state).await;
        drop(state);

        warn!(entry_id = %id, %reason, "entry failed");
        self.inner
            .status
            .current_task(TaskStatus::Failed, &format!("{name}: {reason}"));
    }

    fn publish(&self, event: QueueEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("no subscribers for queue event");
        }
    }

    async fn save_logged(&self, state: &QueueState) {
        if let Err(err) = self.inner.store.save(&state.entries).await {
            warn!(%err, "failed to persist queue snapshot");
        }
    }

    async fn remove_work_dir(&self, id: &EntryId) {
        let dir = self.work_dir_for(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "removed extraction leftovers"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %dir.display(), %err, "failed to remove extraction leftovers"),
        }
    }

    fn fatal_load(&self, err: IngestError) -> IngestError {
        error!(%err, "queue state cannot be recovered");
        self.inner.status.current_task(
            TaskStatus::Failed,
            &format!("Cannot proceed: saved queue could not be recovered ({err})"),
        );
        err
    }
}

#[async_trait]
impl IngestSink for FileQueueProcessor {
    async fn enqueue_path(&self, path: PathBuf) -> Result<()> {
        self.enqueue_file(path).await.map(|_| ())
    }

    async fn rename_path(&self, from: &Path, to: &Path) -> Result<bool> {
        Ok(self.rename_file_in_queue(from, to).await?.is_some())
    }
}
