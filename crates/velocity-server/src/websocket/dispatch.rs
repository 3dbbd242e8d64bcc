//! Fire-and-forget calls into the lifecycle store and audit log.
//!
//! Each call is spawned onto a [`TaskTracker`] with its own deadline and
//! never holds a registry lock. Failures are logged at `warn` and otherwise
//! ignored; relay state never depends on their outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use velocity_core::{AuditLog, SessionId, SessionStore, StoreError};

use super::connection::ClientConnection;

/// Run `fut` with a deadline, mapping elapsed time to [`StoreError::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(StoreError::Timeout(timeout)))
}

/// Background side-effect dispatcher.
#[derive(Clone)]
pub struct SideEffects {
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditLog>,
    timeout: Duration,
    tracker: TaskTracker,
}

impl SideEffects {
    /// Create a dispatcher with a per-call deadline.
    pub fn new(store: Arc<dyn SessionStore>, audit: Arc<dyn AuditLog>, timeout: Duration) -> Self {
        Self {
            store,
            audit,
            timeout,
            tracker: TaskTracker::new(),
        }
    }

    /// The lifecycle store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Number of side effects still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every dispatched side effect has finished, up to `timeout`.
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.tracker.close();
        let done = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        let _ = self.tracker.reopen();
        done
    }

    /// Record a subscriber join. The resulting handle is parked on the
    /// connection so the matching leave can find it.
    pub fn record_join(&self, conn: &ClientConnection) {
        let Some(peer) = conn.peer().cloned() else {
            return;
        };
        let audit = Arc::clone(&self.audit);
        let timeout = self.timeout;
        let session_id = conn.session_id().clone();
        let at = Utc::now();
        let handle = self.tracker.spawn(async move {
            match bounded(timeout, audit.record_join(&session_id, &peer, at)).await {
                Ok(record) => {
                    debug!(session_id = %session_id, record = %record, "join recorded");
                    Some(record)
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to record join");
                    None
                }
            }
        });
        conn.set_join_task(handle);
    }

    /// Record a subscriber leave, only if its join was recorded.
    pub fn record_leave(&self, conn: &ClientConnection) {
        let Some(join) = conn.take_join_task() else {
            return;
        };
        let audit = Arc::clone(&self.audit);
        let timeout = self.timeout;
        let at = Utc::now();
        let conn_id = conn.id.clone();
        drop(self.tracker.spawn(async move {
            let Ok(Some(record)) = join.await else {
                return;
            };
            if let Err(e) = bounded(timeout, audit.record_leave(&record, at)).await {
                warn!(conn_id = %conn_id, record = %record, error = %e, "failed to record leave");
            }
        }));
    }

    /// Stamp the moment a session lost its last connection.
    pub fn touch_last_connection(&self, session_id: SessionId) {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let at = Utc::now();
        drop(self.tracker.spawn(async move {
            let update = store.update_last_connection_at(&session_id, at);
            if let Err(e) = bounded(timeout, update).await {
                warn!(session_id = %session_id, error = %e, "failed to stamp last connection");
            }
        }));
    }

    /// Persist the producer's latest telemetry payload.
    pub fn persist_latest(&self, session_id: SessionId, payload: Value) {
        let store = Arc::clone(&self.store);
        let timeout = self.timeout;
        let at = Utc::now();
        drop(self.tracker.spawn(async move {
            let update = store.update_latest_data(&session_id, &payload, at);
            if let Err(e) = bounded(timeout, update).await {
                warn!(session_id = %session_id, error = %e, "failed to persist latest data");
            }
        }));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
