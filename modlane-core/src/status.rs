use std::fmt;

use modlane_contracts::status::TaskStatus;

/// Destination for user-visible pipeline status.
///
/// The queue reports every state transition here; the worker binary bridges
/// it onto the status channel. Implementations must not block.
pub trait StatusSink: Send + Sync {
    /// Replace the "current task" line shown by UIs.
    fn current_task(&self, status: TaskStatus, message: &str);

    /// Report extraction/conversion progress, 0 to 100.
    fn progress(&self, percent: u8, message: &str);
}

/// Sink used when nothing is listening.
pub struct NoopStatusSink;

impl StatusSink for NoopStatusSink {
    fn current_task(&self, _status: TaskStatus, _message: &str) {}

    fn progress(&self, _percent: u8, _message: &str) {}
}

impl fmt::Debug for NoopStatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopStatusSink")
    }
}
