use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why a file could not be confirmed stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransientFileReason {
    /// The path no longer exists.
    Missing,
    /// Another process holds the file open.
    Locked,
    /// The size kept changing between samples.
    Growing,
}

impl fmt::Display for TransientFileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Missing => "file not found",
            Self::Locked => "file is locked by another process",
            Self::Growing => "file is still being written",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported file type: {}", .0.display())]
    UnsupportedInput(PathBuf),

    #[error("File not ready: {} ({reason})", path.display())]
    TransientFile {
        path: PathBuf,
        reason: TransientFileReason,
    },

    #[error("Extraction failed for {}: {reason}", archive.display())]
    Extraction { archive: PathBuf, reason: String },

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Queue store error: {0}")]
    Store(String),

    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Invalid queue state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl IngestError {
    pub fn extraction(archive: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Extraction {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
