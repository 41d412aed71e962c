use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("status channel has been disposed")]
    Disposed,

    #[error("status channel start refused: launch was not authorized by the host")]
    Unauthorized,

    #[error("failed to bind status channel on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to send to connection {id}: {reason}")]
    PeerSend { id: Uuid, reason: String },

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
