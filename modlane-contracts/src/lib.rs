//! Wire contracts between the Modlane background worker and UI processes.

pub mod endpoint;
pub mod status;

/// Frequently used types for channel producers and consumers.
pub mod prelude {
    pub use super::endpoint::{CONVERSION, CURRENT_TASK, normalize_endpoint};
    pub use super::status::{
        FileSelectionPayload, MessageKind, StatusMessage, TaskStatus,
    };
}
