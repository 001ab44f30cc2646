//! Hub protocol message types.
//!
//! The hub speaks the SignalR JSON protocol: every record is a JSON object
//! terminated by the ASCII record separator (0x1E), and a single WebSocket
//! text frame may carry several records. The record's numeric `type` field
//! selects the message kind.

use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record terminator appended to every outgoing message.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Numeric message types of the hub protocol.
pub mod message_type {
    pub const INVOCATION: u64 = 1;
    pub const STREAM_ITEM: u64 = 2;
    pub const COMPLETION: u64 = 3;
    pub const STREAM_INVOCATION: u64 = 4;
    pub const CANCEL_INVOCATION: u64 = 5;
    pub const PING: u64 = 6;
    pub const CLOSE: u64 = 7;
}

/// Split a text frame into its non-empty records.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

fn frame<T: Serialize>(body: &T) -> WsResult<String> {
    let mut text = serde_json::to_string(body)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

// ============================================================================
// Handshake
// ============================================================================

/// Handshake request sent right after the WebSocket opens.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    /// JSON protocol, version 1.
    pub fn json() -> Self {
        Self {
            protocol: "json".to_string(),
            version: 1,
        }
    }

    pub fn to_frame(&self) -> WsResult<String> {
        frame(self)
    }
}

/// Handshake response. An empty object means success.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Parse the first record of the handshake reply.
    ///
    /// Returns the response and whatever followed the handshake record in
    /// the same frame (servers may batch the first messages with it).
    pub fn parse(text: &str) -> WsResult<(Self, Option<&str>)> {
        let (head, rest) = text.split_once(RECORD_SEPARATOR).ok_or_else(|| {
            WsError::HandshakeFailed("unterminated handshake response".to_string())
        })?;
        let response: Self = serde_json::from_str(head)
            .map_err(|e| WsError::HandshakeFailed(format!("invalid handshake response: {e}")))?;
        let rest = (!rest.trim().is_empty()).then_some(rest);
        Ok((response, rest))
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Invocation of a hub or client method (type 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Present when the caller expects a completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Method name (e.g., "JoinStockGroup", "ReceiveStockPriceUpdate").
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Invocation {
    pub fn new(invocation_id: Option<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            invocation_id,
            target: target.into(),
            arguments,
        }
    }

    /// Serialize as a terminated record.
    pub fn to_frame(&self) -> WsResult<String> {
        #[derive(Serialize)]
        struct Typed<'a> {
            #[serde(rename = "type")]
            message_type: u64,
            #[serde(flatten)]
            body: &'a Invocation,
        }
        frame(&Typed {
            message_type: message_type::INVOCATION,
            body: self,
        })
    }
}

/// Result of an invocation (type 3).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Server-initiated close (type 7).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub allow_reconnect: Option<bool>,
}

/// Inbound hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    Completion(Completion),
    Ping,
    Close(CloseMessage),
    /// Stream items, stream invocations and cancellations are not used.
    Unsupported(u64),
}

impl HubMessage {
    /// Parse a single record (without its separator).
    pub fn parse(record: &str) -> WsResult<Self> {
        let value: Value = serde_json::from_str(record)?;
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| WsError::ParseError(format!("missing message type: {record}")))?;

        match kind {
            message_type::INVOCATION => Ok(Self::Invocation(serde_json::from_value(value)?)),
            message_type::COMPLETION => Ok(Self::Completion(serde_json::from_value(value)?)),
            message_type::PING => Ok(Self::Ping),
            message_type::CLOSE => Ok(Self::Close(serde_json::from_value(value)?)),
            other => Ok(Self::Unsupported(other)),
        }
    }
}

/// Keep-alive ping record.
pub fn ping_frame() -> String {
    format!("{{\"type\":{}}}{}", message_type::PING, RECORD_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_request_frame() {
        let frame = HandshakeRequest::json().to_frame().unwrap();
        assert!(frame.ends_with(RECORD_SEPARATOR));
        let body: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(body, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn test_handshake_response_success_with_trailing_records() {
        let text = "{}\u{1e}{\"type\":6}\u{1e}";
        let (response, rest) = HandshakeResponse::parse(text).unwrap();
        assert!(response.error.is_none());
        assert_eq!(rest, Some("{\"type\":6}\u{1e}"));
    }

    #[test]
    fn test_handshake_response_error() {
        let text = "{\"error\":\"Requested protocol 'json' is not available.\"}\u{1e}";
        let (response, rest) = HandshakeResponse::parse(text).unwrap();
        assert!(response.error.is_some());
        assert!(rest.is_none());
    }

    #[test]
    fn test_handshake_response_unterminated() {
        assert!(matches!(
            HandshakeResponse::parse("{}"),
            Err(WsError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_invocation_frame_has_type_and_id() {
        let invocation = Invocation::new(Some("7".to_string()), "JoinStockGroup", vec![json!("AAPL")]);
        let frame = invocation.to_frame().unwrap();
        let body: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(
            body,
            json!({
                "type": 1,
                "invocationId": "7",
                "target": "JoinStockGroup",
                "arguments": ["AAPL"]
            })
        );
    }

    #[test]
    fn test_invocation_without_id_omits_field() {
        let frame = Invocation::new(None, "Notify", vec![]).to_frame().unwrap();
        assert!(!frame.contains("invocationId"));
    }

    #[test]
    fn test_parse_server_invocation() {
        let record = r#"{"type":1,"target":"ReceiveStockPriceUpdate","arguments":[{"ticker":"AAPL","price":150.25}]}"#;
        match HubMessage::parse(record).unwrap() {
            HubMessage::Invocation(inv) => {
                assert_eq!(inv.target, "ReceiveStockPriceUpdate");
                assert!(inv.invocation_id.is_none());
                assert_eq!(inv.arguments[0]["price"], json!(150.25));
            }
            other => panic!("Expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_completion_with_error() {
        let record = r#"{"type":3,"invocationId":"2","error":"Group not found"}"#;
        assert_eq!(
            HubMessage::parse(record).unwrap(),
            HubMessage::Completion(Completion {
                invocation_id: "2".to_string(),
                result: None,
                error: Some("Group not found".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_ping_close_and_unsupported() {
        assert_eq!(HubMessage::parse(r#"{"type":6}"#).unwrap(), HubMessage::Ping);
        assert_eq!(
            HubMessage::parse(r#"{"type":7,"error":"bye","allowReconnect":true}"#).unwrap(),
            HubMessage::Close(CloseMessage {
                error: Some("bye".to_string()),
                allow_reconnect: Some(true),
            })
        );
        assert_eq!(
            HubMessage::parse(r#"{"type":2,"invocationId":"1","item":1}"#).unwrap(),
            HubMessage::Unsupported(message_type::STREAM_ITEM)
        );
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        assert!(matches!(
            HubMessage::parse(r#"{"target":"x"}"#),
            Err(WsError::ParseError(_))
        ));
        assert!(HubMessage::parse("not json").is_err());
    }

    #[test]
    fn test_split_records() {
        let text = "{\"type\":6}\u{1e}{\"type\":6}\u{1e}";
        assert_eq!(split_records(text).count(), 2);
        assert_eq!(split_records("").count(), 0);
    }

    #[test]
    fn test_ping_frame() {
        assert_eq!(ping_frame(), "{\"type\":6}\u{1e}");
    }
}
