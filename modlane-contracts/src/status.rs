use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator serialized as the `type` field of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Current-task updates.
    Status,
    /// Conversion/extraction progress.
    Progress,
    /// Worker asks a UI to pick from a list of files.
    FileSelection,
    /// UI answers a [`MessageKind::FileSelection`] request.
    FileSelectionResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
}

/// Candidate or selected files, tied to the request that produced them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSelectionPayload {
    pub task_id: Uuid,
    pub files: Vec<String>,
}

/// One frame on the status channel.
///
/// Values are built once through the constructors below and never mutated
/// afterwards; the server serializes each message a single time per
/// broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: TaskStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<FileSelectionPayload>,
}

impl StatusMessage {
    pub fn status(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Status,
            status,
            message: message.into(),
            progress: None,
            payload: None,
        }
    }

    /// Progress update. Values above 100 are clamped.
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        let progress = progress.min(100);
        let status = if progress == 100 {
            TaskStatus::Completed
        } else {
            TaskStatus::InProgress
        };
        Self {
            kind: MessageKind::Progress,
            status,
            message: message.into(),
            progress: Some(progress),
            payload: None,
        }
    }

    pub fn file_selection(
        task_id: Uuid,
        message: impl Into<String>,
        files: Vec<String>,
    ) -> Self {
        Self {
            kind: MessageKind::FileSelection,
            status: TaskStatus::InProgress,
            message: message.into(),
            progress: None,
            payload: Some(FileSelectionPayload { task_id, files }),
        }
    }

    pub fn file_selection_response(task_id: Uuid, selected: Vec<String>) -> Self {
        Self {
            kind: MessageKind::FileSelectionResponse,
            status: TaskStatus::Completed,
            message: String::new(),
            progress: None,
            payload: Some(FileSelectionPayload {
                task_id,
                files: selected,
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn from_json_slice(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}
