//! Inactivity sweep.
//!
//! Sessions the lifecycle store still lists as open but whose last activity is
//! older than the inactivity timeout are closed in the store and in the
//! registry. A candidate that still has live connections is not evicted; its
//! stored timestamp is refreshed instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use velocity_core::{SessionId, SessionStore, StoreError};

use crate::config::SweepConfig;
use crate::metrics::{SWEEP_EVICTIONS_TOTAL, SWEEP_FAILURES_TOTAL, SWEEP_REFRESHES_TOTAL};
use crate::websocket::dispatch::bounded;
use crate::websocket::registry::Registry;

/// Outcome of one sweep pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions the store reported as stale.
    pub candidates: usize,
    /// Sessions closed by this pass.
    pub evicted: Vec<SessionId>,
    /// Live sessions whose stored timestamp was refreshed.
    pub refreshed: Vec<SessionId>,
    /// Candidates whose store update failed; retried next pass.
    pub failed: Vec<SessionId>,
}

/// Periodic eviction of idle sessions.
pub struct InactivitySweeper {
    store: Arc<dyn SessionStore>,
    registry: Arc<Registry>,
    config: SweepConfig,
    op_timeout: std::time::Duration,
}

impl InactivitySweeper {
    /// Create a sweeper. `op_timeout` bounds each store call.
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<Registry>,
        config: SweepConfig,
        op_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            op_timeout,
        }
    }

    /// Sessions idle since before this instant are stale at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.inactivity_timeout)
            .ok()
            .and_then(|idle| now.checked_sub_signed(idle))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run one pass.
    ///
    /// Only the candidate query can fail the pass; a failure on one candidate
    /// is logged and the rest are still processed.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let cutoff = self.cutoff(now);
        let candidates =
            bounded(self.op_timeout, self.store.find_stale_open_sessions(cutoff)).await?;
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for session_id in candidates {
            if self.registry.has_active_connections(&session_id) {
                match bounded(
                    self.op_timeout,
                    self.store.update_last_connection_at(&session_id, now),
                )
                .await
                {
                    Ok(()) => {
                        debug!(session_id = %session_id, "live session refreshed");
                        counter!(SWEEP_REFRESHES_TOTAL).increment(1);
                        report.refreshed.push(session_id);
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "refresh failed");
                        counter!(SWEEP_FAILURES_TOTAL).increment(1);
                        report.failed.push(session_id);
                    }
                }
                continue;
            }

            match bounded(self.op_timeout, self.store.mark_deleted(&session_id, now)).await {
                Ok(true) => {
                    let closed = self.registry.close_session(&session_id);
                    info!(session_id = %session_id, closed, "idle session evicted");
                    counter!(SWEEP_EVICTIONS_TOTAL).increment(1);
                    report.evicted.push(session_id);
                }
                Ok(false) => {
                    debug!(session_id = %session_id, "session already closed");
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to close idle session");
                    counter!(SWEEP_FAILURES_TOTAL).increment(1);
                    report.failed.push(session_id);
                }
            }
        }
        Ok(report)
    }

    /// Sweep on a fixed interval until `cancel` fires. The first pass runs
    /// immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = self.config.interval.as_secs(),
                inactivity_secs = self.config.inactivity_timeout.as_secs(),
                "inactivity sweep started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once(Utc::now()).await {
                            Ok(report) if report.candidates > 0 => info!(
                                candidates = report.candidates,
                                evicted = report.evicted.len(),
                                refreshed = report.refreshed.len(),
                                failed = report.failed.len(),
                                "sweep finished"
                            ),
                            Ok(_) => debug!("sweep found nothing stale"),
                            Err(e) => warn!(error = %e, "sweep query failed"),
                        }
                    }
                    () = cancel.cancelled() => {
                        info!("inactivity sweep stopped");
                        return;
                    }
                }
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use chrono::TimeDelta;
    use tokio::sync::mpsc;
    use velocity_core::testing::{MemorySessionStore, RecordingAuditLog};
    use velocity_core::{PeerMetadata, SessionRecord};

    use super::*;
    use crate::websocket::connection::ClientConnection;
    use crate::websocket::dispatch::SideEffects;

    struct Harness {
        store: Arc<MemorySessionStore>,
        registry: Arc<Registry>,
        sweeper: InactivitySweeper,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemorySessionStore::new());
        let effects = SideEffects::new(
            store.clone(),
            Arc::new(RecordingAuditLog::new()),
            Duration::from_secs(1),
        );
        let registry = Arc::new(Registry::new(effects));
        let sweeper = InactivitySweeper::new(
            store.clone(),
            Arc::clone(&registry),
            SweepConfig::default(),
            Duration::from_secs(1),
        );
        Harness {
            store,
            registry,
            sweeper,
        }
    }

    fn session(store: &MemorySessionStore, id: &str, created: DateTime<Utc>) -> SessionId {
        let id = SessionId::from(id);
        store.insert(SessionRecord::new(id.clone(), created));
        id
    }

    #[test]
    fn cutoff_is_six_hours_back() {
        let h = harness();
        let now = Utc::now();
        assert_eq!(h.sweeper.cutoff(now), now - TimeDelta::hours(6));
    }

    #[tokio::test]
    async fn evicts_only_strictly_older_sessions() {
        let h = harness();
        let now = Utc::now();
        let cutoff = h.sweeper.cutoff(now);
        let old = session(&h.store, "old", cutoff - TimeDelta::seconds(1));
        let edge = session(&h.store, "edge", cutoff);
        let fresh = session(&h.store, "fresh", now);

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.evicted, vec![old.clone()]);
        assert!(h.store.record(&old).unwrap().is_deleted());
        assert!(!h.store.record(&edge).unwrap().is_deleted());
        assert!(!h.store.record(&fresh).unwrap().is_deleted());
    }

    #[tokio::test]
    async fn last_connection_time_overrides_creation_time() {
        let h = harness();
        let now = Utc::now();
        let id = session(&h.store, "s", now - TimeDelta::days(2));
        let mut rec = h.store.record(&id).unwrap();
        rec.last_connection_at = Some(now - TimeDelta::minutes(5));
        h.store.insert(rec);

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.candidates, 0);
    }

    #[tokio::test]
    async fn live_session_is_refreshed_not_evicted() {
        let h = harness();
        let now = Utc::now();
        let id = session(&h.store, "live", now - TimeDelta::hours(7));
        let (tx, mut rx) = mpsc::channel(4);
        let sub = Arc::new(ClientConnection::subscriber(id.clone(), PeerMetadata::default(), tx));
        h.registry.register(Arc::clone(&sub));

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.refreshed, vec![id.clone()]);
        assert!(report.evicted.is_empty());

        let rec = h.store.record(&id).unwrap();
        assert!(!rec.is_deleted());
        assert_eq!(rec.last_connection_at, Some(now));
        assert!(!sub.is_closed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn evicted_session_is_not_swept_again() {
        let h = harness();
        let now = Utc::now();
        let id = session(&h.store, "ghost", now - TimeDelta::hours(7));

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.evicted, vec![id]);
        assert_eq!(h.registry.session_count(), 0);

        let again = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn connection_arriving_after_eviction_is_closed() {
        let h = harness();
        let now = Utc::now();
        let id = session(&h.store, "late", now - TimeDelta::hours(7));

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.evicted, vec![id.clone()]);

        // Admitted before the eviction, registered after it.
        let (tx, mut rx) = mpsc::channel(4);
        let sub = Arc::new(ClientConnection::subscriber(id.clone(), PeerMetadata::default(), tx));
        h.registry.register(Arc::clone(&sub));

        assert!(sub.is_closed());
        assert!(rx.try_recv().unwrap().contains("stream_closed"));
        assert!(!h.registry.has_active_connections(&id));

        let later = h.sweeper.sweep_once(now + TimeDelta::days(30)).await.unwrap();
        assert_eq!(later.candidates, 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_pass() {
        let h = harness();
        let now = Utc::now();
        let old = now - TimeDelta::hours(7);
        let a = session(&h.store, "a", old);
        let b = session(&h.store, "b", old);
        let c = session(&h.store, "c", old);
        h.store.fail_session(&b);

        let report = h.sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.candidates, 3);
        assert_eq!(report.evicted, vec![a, c]);
        assert_eq!(report.failed, vec![b.clone()]);
        assert!(!h.store.record(&b).unwrap().is_deleted());
    }

    #[tokio::test]
    async fn query_failure_fails_the_pass() {
        let h = harness();
        h.store.set_fail_all(true);
        assert_matches!(h.sweeper.sweep_once(Utc::now()).await, Err(StoreError::Backend(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweep_runs_and_stops_on_cancel() {
        let h = harness();
        let id = session(&h.store, "old", Utc::now() - TimeDelta::hours(7));
        let cancel = CancellationToken::new();
        let handle = h.sweeper.spawn(cancel.clone());

        // The first tick fires immediately.
        for _ in 0..100 {
            if h.store.record(&id).unwrap().is_deleted() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.store.record(&id).unwrap().is_deleted());

        cancel.cancel();
        handle.await.unwrap();
    }
}
