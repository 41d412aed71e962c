use std::path::PathBuf;

use super::entry::EntryId;

/// Completion signals published by the queue. The install pipeline
/// subscribes to these instead of polling queue state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// A mod file is ready at `destination`.
    FileMoved {
        entry_id: EntryId,
        source: PathBuf,
        destination: PathBuf,
    },
    /// An archive was unpacked; `files` are the mod files it contained.
    FilesExtracted {
        entry_id: EntryId,
        archive_name: String,
        files: Vec<PathBuf>,
    },
}
