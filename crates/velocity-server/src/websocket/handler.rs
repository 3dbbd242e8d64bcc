//! Inbound frame handling.
//!
//! Only a producer's `stream_data` envelope does anything: its payload is
//! persisted as the session's latest state and the original text is relayed
//! verbatim to every subscriber. Everything else is logged and dropped.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use velocity_core::Envelope;

use super::connection::{ClientConnection, Role};
use super::registry::Registry;

/// Parsed shape of one inbound text frame.
#[derive(Debug)]
pub enum Inbound {
    /// Producer telemetry.
    StreamData(Value),
    /// A well-formed envelope of a type this layer does not act on.
    Ignored(String),
    /// Not a `{type, payload}` envelope.
    Invalid(serde_json::Error),
}

/// Parse a text frame.
pub fn classify(text: &str) -> Inbound {
    match Envelope::parse(text) {
        Ok(env) if env.is_stream_data() => Inbound::StreamData(env.payload),
        Ok(env) => Inbound::Ignored(env.kind),
        Err(e) => Inbound::Invalid(e),
    }
}

/// What happened to a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Relayed to this many subscribers.
    Relayed(usize),
    /// Dropped without side effects.
    Ignored,
    /// Rejected as malformed.
    Invalid,
}

/// Act on one text frame received from `conn`.
pub fn handle_frame(text: &str, conn: &ClientConnection, registry: &Registry) -> FrameOutcome {
    match (conn.role(), classify(text)) {
        (Role::Producer, Inbound::StreamData(payload)) => {
            let session_id = conn.session_id();
            registry.effects().persist_latest(session_id.clone(), payload);
            let delivered = registry.fanout(session_id, &Arc::from(text));
            debug!(session_id = %session_id, delivered, "telemetry relayed");
            FrameOutcome::Relayed(delivered)
        }
        (_, Inbound::Invalid(e)) => {
            warn!(conn_id = %conn.id, role = %conn.role(), error = %e, "malformed frame skipped");
            FrameOutcome::Invalid
        }
        (role, Inbound::StreamData(_)) => {
            debug!(conn_id = %conn.id, %role, "stream_data from non-producer ignored");
            FrameOutcome::Ignored
        }
        (role, Inbound::Ignored(kind)) => {
            debug!(conn_id = %conn.id, %role, kind = %kind, "frame ignored");
            FrameOutcome::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;
    use velocity_core::testing::{MemorySessionStore, RecordingAuditLog};
    use velocity_core::{PeerMetadata, SessionId, SessionRecord};

    use super::*;
    use crate::websocket::dispatch::SideEffects;

    const FRAME: &str = r#"{"type":"stream_data","payload":{"lat":51.5,"lng":-0.12}}"#;

    fn setup() -> (Registry, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        store.insert(SessionRecord::new(SessionId::from("s"), Utc::now()));
        let effects = SideEffects::new(
            store.clone(),
            Arc::new(RecordingAuditLog::new()),
            Duration::from_secs(1),
        );
        (Registry::new(effects), store)
    }

    #[test]
    fn classify_envelopes() {
        assert_matches!(classify(FRAME), Inbound::StreamData(p) if p["lat"] == 51.5);
        assert_matches!(classify(r#"{"type":"hello"}"#), Inbound::Ignored(k) if k == "hello");
        assert_matches!(classify("{"), Inbound::Invalid(_));
        assert_matches!(classify(r#"["stream_data"]"#), Inbound::Invalid(_));
    }

    #[tokio::test]
    async fn producer_telemetry_is_relayed_verbatim_and_persisted() {
        let (registry, store) = setup();
        let (ptx, _prx) = mpsc::channel(8);
        let producer = Arc::new(ClientConnection::producer(SessionId::from("s"), ptx));
        let (stx, mut srx) = mpsc::channel(8);
        let sub = Arc::new(ClientConnection::subscriber(
            SessionId::from("s"),
            PeerMetadata::default(),
            stx,
        ));
        registry.register(Arc::clone(&producer));
        registry.register(sub);

        assert_eq!(handle_frame(FRAME, &producer, &registry), FrameOutcome::Relayed(1));
        assert_eq!(&*srx.recv().await.unwrap(), FRAME);

        assert!(registry.effects().drain(Duration::from_secs(5)).await);
        let rec = store.record(&SessionId::from("s")).unwrap();
        assert_eq!(rec.latest_data, Some(json!({"lat": 51.5, "lng": -0.12})));
    }

    #[tokio::test]
    async fn subscriber_frames_are_ignored() {
        let (registry, store) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let sub = ClientConnection::subscriber(SessionId::from("s"), PeerMetadata::default(), tx);
        assert_eq!(handle_frame(FRAME, &sub, &registry), FrameOutcome::Ignored);
        assert!(registry.effects().drain(Duration::from_secs(5)).await);
        assert!(store.record(&SessionId::from("s")).unwrap().latest_data.is_none());
    }

    #[test]
    fn malformed_and_unknown_frames_do_nothing() {
        let (registry, _store) = setup();
        let (tx, _rx) = mpsc::channel(8);
        let producer = ClientConnection::producer(SessionId::from("s"), tx);
        assert_eq!(handle_frame("not json", &producer, &registry), FrameOutcome::Invalid);
        assert_eq!(
            handle_frame(r#"{"type":"heartbeat","payload":null}"#, &producer, &registry),
            FrameOutcome::Ignored
        );
    }
}
