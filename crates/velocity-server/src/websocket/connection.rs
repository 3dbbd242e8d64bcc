//! Per-connection state shared between the registry and the pumps.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use velocity_core::{ConnectionId, JoinRecordId, PeerMetadata, ServerMessage, SessionId};

/// Which side of a session a connection serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Originates telemetry.
    Producer,
    /// Receives relayed telemetry.
    Subscriber,
}

impl Role {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connected client.
///
/// The outbound queue sender lives here behind a lock so that the registry
/// can close it: once [`close`](Self::close) drops the only sender, the write
/// pump drains what is already queued, sends a close frame, and exits.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    session_id: SessionId,
    role: Role,
    peer: Option<PeerMetadata>,
    tx: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed queue.
    pub dropped_messages: AtomicU64,
    join_record: Mutex<Option<JoinHandle<Option<JoinRecordId>>>>,
}

impl ClientConnection {
    fn new(
        session_id: SessionId,
        role: Role,
        peer: Option<PeerMetadata>,
        tx: mpsc::Sender<Arc<str>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session_id,
            role,
            peer,
            tx: Mutex::new(Some(tx)),
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            join_record: Mutex::new(None),
        }
    }

    /// A producer connection.
    pub fn producer(session_id: SessionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self::new(session_id, Role::Producer, None, tx)
    }

    /// A subscriber connection carrying the metadata recorded with its join.
    pub fn subscriber(
        session_id: SessionId,
        peer: PeerMetadata,
        tx: mpsc::Sender<Arc<str>>,
    ) -> Self {
        Self::new(session_id, Role::Subscriber, Some(peer), tx)
    }

    /// Session this connection belongs to for its whole lifetime.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Connection role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Subscriber peer metadata (`None` for producers).
    pub fn peer(&self) -> Option<&PeerMetadata> {
        self.peer.as_ref()
    }

    /// Try to enqueue a text frame without blocking.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter. The newest frame is the one dropped.
    pub fn send(&self, message: Arc<str>) -> bool {
        let sent = self
            .tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.try_send(message).is_ok());
        if !sent {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Serialize a relay message and enqueue it.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Arc::from(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize relay message");
                false
            }
        }
    }

    /// Close the outbound queue. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    /// Whether the outbound queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub(crate) fn set_join_task(&self, handle: JoinHandle<Option<JoinRecordId>>) {
        *self.join_record.lock() = Some(handle);
    }

    pub(crate) fn take_join_task(&self) -> Option<JoinHandle<Option<JoinRecordId>>> {
        self.join_record.lock().take()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_producer(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::producer(SessionId::from("s"), tx), rx)
    }

    #[test]
    fn producer_has_no_peer() {
        let (conn, _rx) = make_producer(4);
        assert_eq!(conn.role(), Role::Producer);
        assert!(conn.peer().is_none());
        assert_eq!(conn.session_id().as_str(), "s");
    }

    #[test]
    fn subscriber_keeps_peer() {
        let (tx, _rx) = mpsc::channel(4);
        let peer = PeerMetadata {
            user_agent: Some("Safari".into()),
            ip_address: None,
        };
        let conn = ClientConnection::subscriber(SessionId::from("s"), peer.clone(), tx);
        assert_eq!(conn.role(), Role::Subscriber);
        assert_eq!(conn.peer(), Some(&peer));
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_producer(4);
        assert!(conn.send(Arc::from("hello")));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_drops_newest() {
        let (conn, mut rx) = make_producer(1);
        assert!(conn.send(Arc::from("first")));
        assert!(!conn.send(Arc::from("second")));
        assert_eq!(conn.drop_count(), 1);
        assert_eq!(&*rx.try_recv().unwrap(), "first");
    }

    #[tokio::test]
    async fn close_ends_queue_after_draining() {
        let (conn, mut rx) = make_producer(4);
        assert!(conn.send(Arc::from("last")));
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert_eq!(&*rx.recv().await.unwrap(), "last");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn send_after_close_counts_as_drop() {
        let (conn, _rx) = make_producer(4);
        let _ = conn.close();
        assert!(!conn.send(Arc::from("late")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_message_serializes() {
        let (conn, mut rx) = make_producer(4);
        assert!(conn.send_message(&ServerMessage::StreamClosed));
        let frame = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "stream_closed");
    }

    #[test]
    fn mark_alive_resets_idle() {
        let (conn, _rx) = make_producer(4);
        conn.mark_alive();
        assert!(conn.idle_for() < Duration::from_secs(1));
        assert!(conn.age() < Duration::from_secs(1));
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _ra) = make_producer(1);
        let (b, _rb) = make_producer(1);
        assert_ne!(a.id, b.id);
    }
}
