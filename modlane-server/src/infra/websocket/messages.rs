use axum::extract::ws::{Message, Utf8Bytes};
use modlane_contracts::status::StatusMessage;

use crate::error::ChannelResult;

/// Serialize a status message once for fan-out.
pub fn status_to_frame(msg: &StatusMessage) -> ChannelResult<Utf8Bytes> {
    Ok(Utf8Bytes::from(msg.to_json()?))
}

/// Decode an inbound frame. Control frames yield `None`.
pub fn websocket_to_status(msg: &Message) -> ChannelResult<Option<StatusMessage>> {
    match msg {
        Message::Text(text) => Ok(Some(StatusMessage::from_json(text.as_str())?)),
        Message::Binary(bin) => Ok(Some(StatusMessage::from_json_slice(bin.as_ref())?)),
        _ => Ok(None),
    }
}
