//! Hub connection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Remote call {method} rejected: {message}")]
    Remote { method: String, message: String },

    #[error("Remote call {method} timed out")]
    InvocationTimeout { method: String },

    #[error("Server timeout: no message received")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Whether the error comes from the connection being unusable, as opposed
    /// to the remote side rejecting a call.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Remote { .. } | Self::ParseError(_) | Self::Json(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
