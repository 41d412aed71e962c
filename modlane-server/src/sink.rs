//! Adapters that route pipeline and watcher reports onto the status channel.

use std::path::Path;

use modlane_contracts::status::TaskStatus;
use modlane_core::{FsWatchObserver, StatusSink};
use tracing::debug;

use crate::channel::StatusChannelServer;

/// Publishes queue status on `/currentTask` and progress on `/conversion`.
#[derive(Clone, Debug)]
pub struct ChannelStatusSink {
    server: StatusChannelServer,
}

impl ChannelStatusSink {
    pub fn new(server: StatusChannelServer) -> Self {
        Self { server }
    }
}

impl StatusSink for ChannelStatusSink {
    fn current_task(&self, status: TaskStatus, message: &str) {
        // Always publish so the catch-up copy stays current for late joiners.
        if let Err(err) = self.server.report_current_task(status, message) {
            debug!(%err, task = message, "current task not published");
        }
    }

    fn progress(&self, percent: u8, message: &str) {
        if !self.server.has_connected_clients() {
            return;
        }
        if let Err(err) = self.server.broadcast_progress(percent, message) {
            debug!(%err, percent, "progress not published");
        }
    }
}

/// Surfaces watch failures to connected UIs.
#[derive(Clone, Debug)]
pub struct ChannelWatchObserver {
    server: StatusChannelServer,
}

impl ChannelWatchObserver {
    pub fn new(server: StatusChannelServer) -> Self {
        Self { server }
    }
}

impl FsWatchObserver for ChannelWatchObserver {
    fn on_error(&self, path: &Path, error: &str) {
        let message = format!("Cannot watch {}: {error}", path.display());
        if let Err(err) = self.server.report_current_task(TaskStatus::Failed, &message) {
            debug!(%err, "watch error not published");
        }
    }
}
