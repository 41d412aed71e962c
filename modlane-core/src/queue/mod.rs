//! Durable single-consumer queue driving discovered files to install handoff.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

pub mod entry;
pub mod events;
pub mod processor;
pub mod store;

pub use entry::{EntryId, EntryState, QueueEntry};
pub use events::QueueEvent;
pub use processor::{FileQueueProcessor, LoadReport};
pub use store::{QueueStore, StoreLoad};

/// Entry points the filesystem watcher feeds into.
#[async_trait]
pub trait IngestSink: Send + Sync {
    /// Offer a newly seen path for processing.
    async fn enqueue_path(&self, path: PathBuf) -> Result<()>;

    /// Follow a rename. Returns `false` when nothing was queued under `from`.
    async fn rename_path(&self, from: &Path, to: &Path) -> Result<bool>;
}
