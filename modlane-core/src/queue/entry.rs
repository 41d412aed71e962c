use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::FileKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    Pending,
    Stabilizing,
    Classified,
    Extracting,
    ReadyForInstall,
    Failed,
}

impl EntryState {
    /// Terminal entries are never picked up by the processing loop again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ReadyForInstall | Self::Failed)
    }
}

/// Identifier assigned once when a file is discovered. It follows the entry
/// through renames and is never reused by a later file at the same path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Hash of the discovery path and time. `salt` tells apart discoveries
    /// that would otherwise land on the same id.
    pub fn derive(path: &Path, discovered_at: DateTime<Utc>, salt: u32) -> Self {
        let normalized: PathBuf = path.components().collect();
        let nanos = discovered_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| discovered_at.timestamp_micros());
        let mut hasher = Sha256::new();
        hasher.update(normalized.to_string_lossy().as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(salt.to_le_bytes());
        Self(URL_SAFE_NO_PAD.encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discovered file tracked through the ingestion pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub original_path: PathBuf,
    /// Where the file lives now; follows renames reported by the watcher.
    pub current_path: PathBuf,
    pub state: EntryState,
    #[serde(default)]
    pub kind: Option<FileKind>,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(path: PathBuf) -> Self {
        let discovered_at = Utc::now();
        Self {
            id: EntryId::derive(&path, discovered_at, 0),
            original_path: path.clone(),
            current_path: path,
            state: EntryState::Pending,
            kind: None,
            discovered_at,
            attempts: 0,
            last_error: None,
        }
    }

    /// File name used in user-facing messages.
    pub fn display_name(&self) -> String {
        self.current_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.current_path.display().to_string())
    }

    pub(crate) fn fail(&mut self, reason: impl fmt::Display) {
        self.state = EntryState::Failed;
        self.last_error = Some(reason.to_string());
    }

    /// Put the entry back at the start of the pipeline as if newly found.
    pub(crate) fn reset(&mut self) {
        self.state = EntryState::Pending;
        self.kind = None;
        self.attempts = 0;
        self.last_error = None;
        self.discovered_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_for_equivalent_paths() {
        let at = Utc::now();
        let a = EntryId::derive(Path::new("/downloads/./mods/outfit.pmp"), at, 0);
        let b = EntryId::derive(Path::new("/downloads/mods/outfit.pmp"), at, 0);
        let c = EntryId::derive(Path::new("/downloads/mods/other.pmp"), at, 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 22);
    }

    #[test]
    fn later_discoveries_of_a_path_get_new_ids() {
        let path = Path::new("/downloads/pack.zip");
        let first = Utc::now();
        let later = first + chrono::Duration::milliseconds(5);
        assert_ne!(
            EntryId::derive(path, first, 0),
            EntryId::derive(path, later, 0)
        );
        assert_ne!(
            EntryId::derive(path, first, 0),
            EntryId::derive(path, first, 1)
        );
    }

    #[test]
    fn new_entry_starts_pending() {
        let entry = QueueEntry::new(PathBuf::from("/downloads/pack.zip"));
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.original_path, entry.current_path);
        assert_eq!(entry.display_name(), "pack.zip");
        assert!(!entry.state.is_terminal());
    }

    #[test]
    fn reset_clears_failure() {
        let mut entry = QueueEntry::new(PathBuf::from("/downloads/pack.zip"));
        entry.fail("file not ready");
        assert_eq!(entry.state, EntryState::Failed);
        assert!(entry.state.is_terminal());

        entry.reset();
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.last_error, None);
    }
}
