//! # Modlane Core
//!
//! Ingestion pipeline for mod downloads: files that land in watched
//! directories are waited on until the downloader lets go of them,
//! classified by extension, unpacked when they are archives, and handed to
//! the install pipeline as completion events.
//!
//! ## Architecture
//!
//! - [`fs_watch`]: `notify`-based watcher with per-path debounce and rename
//!   following
//! - [`queue`]: durable single-consumer queue, its snapshot store and the
//!   processing loop
//! - [`stability`]: the "is the download finished" probe
//! - [`classify`]: extension rules for mod files and archives
//! - [`extract`]: zip extraction in-process, 7z/rar through the `7z` binary
//! - [`status`]: the seam user-visible progress is reported through
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use modlane_core::{
//!     FileQueueProcessor, FileWatcher, IngestConfig, IngestSink, NoopFsWatchObserver,
//!     NoopStatusSink, WatchTarget,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run() -> modlane_core::Result<()> {
//!     let config = IngestConfig::default();
//!     let queue = FileQueueProcessor::new(config.clone(), Arc::new(NoopStatusSink));
//!     queue.load_state().await?;
//!     let worker = queue.start_processing(CancellationToken::new())?;
//!
//!     let sink: Arc<dyn IngestSink> = Arc::new(queue.clone());
//!     let watcher = FileWatcher::new(config.watch, sink, Arc::new(NoopFsWatchObserver));
//!     watcher
//!         .start_watching(vec![WatchTarget::recursive("/home/me/Downloads")])
//!         .await?;
//!
//!     let mut events = queue.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     let _ = worker.await;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod fs_watch;
pub mod queue;
pub mod stability;
pub mod status;

pub use classify::{ArchiveFormat, FileKind, classify, is_supported};
pub use config::{ExtractionConfig, IngestConfig, StabilityConfig, WatchConfig};
pub use error::{IngestError, Result, TransientFileReason};
pub use extract::ArchiveExtractor;
pub use fs_watch::{
    FileWatcher, FsWatchObserver, NoopFsWatchObserver, WatchReport, WatchTarget, WatcherEvent,
};
pub use queue::{
    EntryId, EntryState, FileQueueProcessor, IngestSink, LoadReport, QueueEntry, QueueEvent,
    QueueStore, StoreLoad,
};
pub use stability::{StabilityProbe, StableFile};
pub use status::{NoopStatusSink, StatusSink};
