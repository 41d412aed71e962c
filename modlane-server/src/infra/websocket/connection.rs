use std::fmt;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::{ChannelError, ChannelResult};

/// Work for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// A serialized status message.
    Frame(Utf8Bytes),
    /// Send a close frame and stop writing.
    Close,
}

#[derive(Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: Uuid,
    /// Endpoint the peer connected to, e.g. `/currentTask`
    pub endpoint: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("connected_at", &self.connected_at)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(endpoint: impl Into<String>, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::now_v7(),
            endpoint: endpoint.into(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Queue a frame for this connection without waiting. A full or closed
    /// outbound buffer fails only this peer.
    pub fn try_send(&self, frame: Utf8Bytes) -> ChannelResult<()> {
        self.sender
            .try_send(Outbound::Frame(frame))
            .map_err(|err| {
                let reason = match err {
                    TrySendError::Full(_) => "outbound buffer full",
                    TrySendError::Closed(_) => "connection closed",
                };
                ChannelError::PeerSend {
                    id: self.id,
                    reason: reason.to_string(),
                }
            })
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) {
        let _ = self.sender.try_send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
