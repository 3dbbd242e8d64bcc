//! Wire protocol shared by producers, subscribers, and the relay.
//!
//! Every frame is a JSON object `{"type": string, "payload": any}`.
//! Producers send `stream_data`; the relay sends `stream_data` (verbatim),
//! `viewer_count`, `error`, and `stream_closed`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SessionId;

/// Envelope type carrying producer telemetry.
pub const STREAM_DATA: &str = "stream_data";

/// Envelope type carrying a viewer-count update.
pub const VIEWER_COUNT: &str = "viewer_count";

/// Envelope type carrying an error notice.
pub const ERROR: &str = "error";

/// Envelope type announcing that the stream is about to close.
pub const STREAM_CLOSED: &str = "stream_closed";

/// Inbound frame as sent by a client.
///
/// `payload` is opaque to the relay and defaults to `null` when absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary payload.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Whether this envelope carries telemetry to relay.
    pub fn is_stream_data(&self) -> bool {
        self.kind == STREAM_DATA
    }
}

/// Frames the relay originates.
///
/// Producer `stream_data` frames are forwarded as received and never pass
/// through this type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Viewer count sent to the producer.
    ViewerCount(ViewerCountUpdate),
    /// Error notice.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// The stream is closing; the connection will be dropped next.
    StreamClosed,
}

impl ServerMessage {
    /// Build an error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Wire shape of a viewer-count update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerCountUpdate {
    /// Session the count belongs to.
    pub stream_id: SessionId,
    /// Subscribers currently connected.
    pub viewer_count: usize,
    /// `true` only when the update was caused by a join.
    pub new_user: bool,
}

/// Why the viewer count changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerChange {
    /// A subscriber joined.
    Joined,
    /// A subscriber left.
    Left,
    /// A producer (re)connected to a session that already had subscribers.
    Snapshot,
}

/// Typed viewer-count notification raised by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewerCountEvent {
    /// Session the count belongs to.
    pub session_id: SessionId,
    /// Subscriber set size right after the change.
    pub count: usize,
    /// What triggered the notification.
    pub reason: ViewerChange,
}

impl From<ViewerCountEvent> for ViewerCountUpdate {
    fn from(event: ViewerCountEvent) -> Self {
        Self {
            stream_id: event.session_id,
            viewer_count: event.count,
            new_user: event.reason == ViewerChange::Joined,
        }
    }
}

impl From<ViewerCountEvent> for ServerMessage {
    fn from(event: ViewerCountEvent) -> Self {
        Self::ViewerCount(event.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_stream_data_envelope() {
        let env = Envelope::parse(r#"{"type":"stream_data","payload":{"speed":190.3}}"#).unwrap();
        assert!(env.is_stream_data());
        assert_eq!(env.payload["speed"], 190.3);
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let env = Envelope::parse(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(env.kind, "ping");
        assert!(env.payload.is_null());
        assert!(!env.is_stream_data());
    }

    #[test]
    fn envelope_requires_type() {
        assert!(Envelope::parse(r#"{"payload":1}"#).is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn viewer_count_wire_shape() {
        let msg: ServerMessage = ViewerCountEvent {
            session_id: SessionId::from("abc"),
            count: 2,
            reason: ViewerChange::Joined,
        }
        .into();
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "viewer_count",
                "payload": {"streamId": "abc", "viewerCount": 2, "newUser": true}
            })
        );
    }

    #[test]
    fn left_and_snapshot_are_not_new_users() {
        for reason in [ViewerChange::Left, ViewerChange::Snapshot] {
            let update: ViewerCountUpdate = ViewerCountEvent {
                session_id: SessionId::from("abc"),
                count: 1,
                reason,
            }
            .into();
            assert!(!update.new_user);
        }
    }

    #[test]
    fn error_wire_shape() {
        let value: Value =
            serde_json::from_str(&ServerMessage::error("boom").to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "error", "payload": {"message": "boom"}}));
    }

    #[test]
    fn relayed_telemetry_is_not_a_server_message() {
        let frame = r#"{"type":"stream_data","payload":{"speed":3}}"#;
        assert!(serde_json::from_str::<ServerMessage>(frame).is_err());
        assert!(Envelope::parse(frame).unwrap().is_stream_data());
    }

    #[test]
    fn stream_closed_wire_shape() {
        let json = ServerMessage::StreamClosed.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], STREAM_CLOSED);
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServerMessage::StreamClosed);
    }
}
