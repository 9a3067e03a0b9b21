//! WebSocket frame vocabulary shared by the whole crate.
//!
//! Downstream sockets speak axum's WebSocket types while upstream sockets
//! speak tungstenite's; both conversions live here so the rest of the crate
//! only deals in [`MessageType`] and [`CloseCode`].

use axum::extract::ws;
use bytes::Bytes;
use tokio_tungstenite::tungstenite;

use crate::error::GatewayError;

/// Transported frame types. Control frames never leave the channel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Binary,
}

impl MessageType {
    /// Canonical lower-case name, also the default routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Binary => "binary",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket close status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Routine shutdown of a peer or upstream.
    pub const NORMAL_CLOSURE: CloseCode = CloseCode(1000);
    /// Inactivity timeout.
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// Frame exceeded the configured read limit.
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    /// Upstream dial failed or another internal fault.
    pub const INTERNAL_ERROR: CloseCode = CloseCode(1011);
    /// Registry or channel is shutting down.
    pub const SERVICE_RESTART: CloseCode = CloseCode(1012);
    /// Connection limit reached.
    pub const TRY_AGAIN_LATER: CloseCode = CloseCode(1013);
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds an outbound downstream message, validating text payloads.
pub(crate) fn to_downstream_message(
    msg_type: MessageType,
    data: Bytes,
) -> Result<ws::Message, GatewayError> {
    match msg_type {
        MessageType::Text => {
            let text =
                String::from_utf8(data.to_vec()).map_err(|_| GatewayError::InvalidTextFrame)?;
            Ok(ws::Message::Text(text.into()))
        }
        MessageType::Binary => Ok(ws::Message::Binary(data)),
    }
}

/// Builds an outbound upstream message, validating text payloads.
pub(crate) fn to_upstream_message(
    msg_type: MessageType,
    data: Bytes,
) -> Result<tungstenite::Message, GatewayError> {
    match msg_type {
        MessageType::Text => {
            let text =
                String::from_utf8(data.to_vec()).map_err(|_| GatewayError::InvalidTextFrame)?;
            Ok(tungstenite::Message::Text(text.into()))
        }
        MessageType::Binary => Ok(tungstenite::Message::Binary(data)),
    }
}

/// Downstream close frame.
pub(crate) fn downstream_close_message(code: CloseCode, reason: &str) -> ws::Message {
    ws::Message::Close(Some(ws::CloseFrame {
        code: code.0,
        reason: reason.to_owned().into(),
    }))
}

/// Upstream close frame.
pub(crate) fn upstream_close_message(code: CloseCode, reason: &str) -> tungstenite::Message {
    tungstenite::Message::Close(Some(tungstenite::protocol::CloseFrame {
        code: tungstenite::protocol::frame::coding::CloseCode::from(code.0),
        reason: reason.to_owned().into(),
    }))
}
