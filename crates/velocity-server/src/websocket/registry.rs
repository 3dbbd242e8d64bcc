//! Session registry: which connections belong to which session.
//!
//! All membership state sits behind one `parking_lot::Mutex`. Register,
//! deregister, fanout, and the count queries each take the lock once, so every
//! caller sees a consistent snapshot and viewer-count notifications reach the
//! producer in the order the membership changes happened.
//!
//! Closed session ids are remembered so that a connection finishing its
//! handshake after the stream was deleted or evicted is turned away instead of
//! reopening the session.
//!
//! Nothing under the lock awaits. Outbound delivery is `try_send` onto bounded
//! queues, and store/audit calls are handed to [`SideEffects`], which spawns
//! them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use velocity_core::{ConnectionId, ServerMessage, SessionId, ViewerChange, ViewerCountEvent};

use super::connection::{ClientConnection, Role};
use super::dispatch::SideEffects;
use crate::metrics::{RELAY_DROPS_TOTAL, RELAY_MESSAGES_TOTAL, RELAY_SESSIONS_ACTIVE};

/// Notice sent to a producer displaced by a newer producer connection.
pub const SUPERSEDED_MESSAGE: &str = "superseded by a newer producer connection";

/// One producer slot and the subscriber set for a session id.
#[derive(Default)]
struct Session {
    producer: Option<Arc<ClientConnection>>,
    subscribers: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl Session {
    fn is_empty(&self) -> bool {
        self.producer.is_none() && self.subscribers.is_empty()
    }

    fn connection_count(&self) -> usize {
        self.subscribers.len() + usize::from(self.producer.is_some())
    }

    fn is_current_producer(&self, conn: &ClientConnection) -> bool {
        self.producer.as_ref().is_some_and(|p| p.id == conn.id)
    }
}

/// Single source of truth for session membership.
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, Session>>,
    /// Ids passed to `close_session`. Only locked while `sessions` is held.
    retired: Mutex<HashSet<SessionId>>,
    effects: SideEffects,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(effects: SideEffects) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            effects,
        }
    }

    /// Background side-effect dispatcher.
    pub fn effects(&self) -> &SideEffects {
        &self.effects
    }

    /// Add a connection to its session, creating the session if needed.
    ///
    /// A producer replaces any producer already registered for the session;
    /// the displaced connection receives an `error` notice and has its queue
    /// closed. A subscriber join notifies the producer with the new count.
    ///
    /// A connection for a session already closed through
    /// [`close_session`](Self::close_session) is not added: it receives
    /// `stream_closed` and has its queue closed, so its pumps wind down.
    pub fn register(&self, conn: Arc<ClientConnection>) {
        let session_id = conn.session_id().clone();
        let displaced = {
            let mut sessions = self.sessions.lock();
            if self.retired.lock().contains(&session_id) {
                drop(sessions);
                info!(
                    session_id = %session_id,
                    conn_id = %conn.id,
                    role = %conn.role(),
                    "session already closed, connection refused"
                );
                let _ = conn.send_message(&ServerMessage::StreamClosed);
                let _ = conn.close();
                return;
            }
            let created = !sessions.contains_key(&session_id);
            let session = sessions.entry(session_id.clone()).or_default();

            let displaced = match conn.role() {
                Role::Producer => {
                    let displaced = session.producer.replace(Arc::clone(&conn));
                    if !session.subscribers.is_empty() {
                        notify_producer(
                            &conn,
                            &session_id,
                            session.subscribers.len(),
                            ViewerChange::Snapshot,
                        );
                    }
                    displaced
                }
                Role::Subscriber => {
                    let _ = session.subscribers.insert(conn.id.clone(), Arc::clone(&conn));
                    self.effects.record_join(&conn);
                    if let Some(producer) = &session.producer {
                        notify_producer(
                            producer,
                            &session_id,
                            session.subscribers.len(),
                            ViewerChange::Joined,
                        );
                    }
                    None
                }
            };

            debug!(
                session_id = %session_id,
                conn_id = %conn.id,
                role = %conn.role(),
                viewers = session.subscribers.len(),
                "connection registered"
            );
            if created {
                info!(session_id = %session_id, "session opened");
            }
            record_session_gauge(sessions.len());
            displaced
        };

        if let Some(old) = displaced {
            warn!(session_id = %session_id, conn_id = %old.id, "producer superseded");
            let _ = old.send_message(&ServerMessage::error(SUPERSEDED_MESSAGE));
            let _ = old.close();
        }
    }

    /// Remove a connection from its session and close its queue.
    ///
    /// Losing the producer ends the session for every subscriber: each
    /// receives `stream_closed` and has its queue closed. A session left with
    /// no connections is dropped and its last-connection time is stamped.
    /// Unknown or already-removed connections are a no-op apart from closing
    /// their own queue.
    pub fn deregister(&self, conn: &ClientConnection) {
        let session_id = conn.session_id();
        {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(session_id) else {
                let _ = conn.close();
                return;
            };

            let removed = match conn.role() {
                Role::Producer if session.is_current_producer(conn) => {
                    session.producer = None;
                    let viewers = session.subscribers.len();
                    for sub in std::mem::take(&mut session.subscribers).into_values() {
                        let _ = sub.send_message(&ServerMessage::StreamClosed);
                        let _ = sub.close();
                        self.effects.record_leave(&sub);
                    }
                    info!(session_id = %session_id, viewers, "producer left, subscribers closed");
                    true
                }
                Role::Producer => false,
                Role::Subscriber => {
                    let removed = session.subscribers.remove(&conn.id).is_some();
                    if removed {
                        self.effects.record_leave(conn);
                        if let Some(producer) = &session.producer {
                            notify_producer(
                                producer,
                                session_id,
                                session.subscribers.len(),
                                ViewerChange::Left,
                            );
                        }
                    }
                    removed
                }
            };

            if removed {
                debug!(
                    session_id = %session_id,
                    conn_id = %conn.id,
                    role = %conn.role(),
                    viewers = session.subscribers.len(),
                    "connection deregistered"
                );
                if session.is_empty() {
                    let _ = sessions.remove(session_id);
                    self.effects.touch_last_connection(session_id.clone());
                    info!(session_id = %session_id, "session emptied");
                }
                record_session_gauge(sessions.len());
            }
        }
        let _ = conn.close();
    }

    /// Enqueue `frame` on every subscriber of `session_id`.
    ///
    /// Best effort: a full queue drops the frame for that subscriber only.
    /// Unknown sessions are a silent no-op. Returns the number of subscribers
    /// the frame was queued for.
    pub fn fanout(&self, session_id: &SessionId, frame: &Arc<str>) -> usize {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(session_id) else {
            return 0;
        };
        let mut delivered = 0_usize;
        for sub in session.subscribers.values() {
            if sub.send(Arc::clone(frame)) {
                delivered += 1;
            } else {
                counter!(RELAY_DROPS_TOTAL).increment(1);
                debug!(
                    session_id = %session_id,
                    conn_id = %sub.id,
                    dropped = sub.drop_count(),
                    "subscriber queue full, frame dropped"
                );
            }
        }
        counter!(RELAY_MESSAGES_TOTAL).increment(delivered as u64);
        delivered
    }

    /// Close every connection of `session_id` and forget the session.
    ///
    /// Each connection receives `stream_closed` first. Returns how many
    /// connections were closed; unknown sessions return `0`. Later
    /// registrations for the same id are refused.
    pub fn close_session(&self, session_id: &SessionId) -> usize {
        let session = {
            let mut sessions = self.sessions.lock();
            let _ = self.retired.lock().insert(session_id.clone());
            let session = sessions.remove(session_id);
            record_session_gauge(sessions.len());
            session
        };
        let Some(session) = session else {
            return 0;
        };
        let closed = self.close_connections(session);
        info!(session_id = %session_id, closed, "session closed");
        closed
    }

    /// Close every session. Used on server shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut sessions = self.sessions.lock();
            let drained = sessions.drain().collect();
            record_session_gauge(0);
            drained
        };
        let sessions = drained.len();
        let closed: usize = drained
            .into_iter()
            .map(|(_, session)| self.close_connections(session))
            .sum();
        if sessions > 0 {
            info!(sessions, connections = closed, "all sessions closed");
        }
        closed
    }

    fn close_connections(&self, session: Session) -> usize {
        let mut closed = 0;
        let conns = session.producer.into_iter().chain(session.subscribers.into_values());
        for conn in conns {
            let _ = conn.send_message(&ServerMessage::StreamClosed);
            if conn.close() {
                closed += 1;
            }
            if conn.role() == Role::Subscriber {
                self.effects.record_leave(&conn);
            }
        }
        closed
    }

    /// Current subscriber count, `0` for unknown sessions.
    pub fn viewer_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map_or(0, |s| s.subscribers.len())
    }

    /// Whether the session holds a producer or at least one subscriber.
    pub fn has_active_connections(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| !s.is_empty())
    }

    /// Whether a producer is currently registered for the session.
    pub fn has_producer(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| s.producer.is_some())
    }

    /// Number of sessions held.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of connections across all sessions.
    pub fn connection_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .map(Session::connection_count)
            .sum()
    }
}

fn notify_producer(
    producer: &ClientConnection,
    session_id: &SessionId,
    count: usize,
    reason: ViewerChange,
) {
    let event = ViewerCountEvent {
        session_id: session_id.clone(),
        count,
        reason,
    };
    if !producer.send_message(&event.into()) {
        warn!(
            session_id = %session_id,
            conn_id = %producer.id,
            count,
            "producer queue full, viewer count dropped"
        );
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_session_gauge(sessions: usize) {
    gauge!(RELAY_SESSIONS_ACTIVE).set(sessions as f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
