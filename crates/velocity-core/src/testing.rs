//! In-memory collaborator doubles for tests.
//!
//! [`MemorySessionStore`] and [`RecordingAuditLog`] keep everything in a
//! `parking_lot::Mutex` and support failure injection so callers can test
//! that background side-effect errors never disturb relay state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::{Result, StoreError};
use crate::ids::{JoinRecordId, SessionId};
use crate::traits::{AuditLog, PeerMetadata, SessionRecord, SessionStore};

/// [`SessionStore`] backed by a `HashMap`.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<SessionId, SessionRecord>>,
    failing: Mutex<HashSet<SessionId>>,
    fail_all: AtomicBool,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record verbatim.
    pub fn insert(&self, record: SessionRecord) {
        let _ = self.records.lock().insert(record.session_id.clone(), record);
    }

    /// Snapshot of a record.
    pub fn record(&self, session_id: &SessionId) -> Option<SessionRecord> {
        self.records.lock().get(session_id).cloned()
    }

    /// Make every operation fail.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make writes touching `session_id` fail.
    pub fn fail_session(&self, session_id: &SessionId) {
        let _ = self.failing.lock().insert(session_id.clone());
    }

    fn check(&self, session_id: Option<&SessionId>) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected failure"));
        }
        if let Some(id) = session_id {
            if self.failing.lock().contains(id) {
                return Err(StoreError::backend(format!("injected failure for {id}")));
            }
        }
        Ok(())
    }

    fn update<F>(&self, session_id: &SessionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionRecord),
    {
        self.check(Some(session_id))?;
        let mut records = self.records.lock();
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<SessionRecord> {
        self.check(None)?;
        let record = SessionRecord::new(session_id.clone(), at);
        self.insert(record.clone());
        Ok(record)
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>> {
        self.check(None)?;
        Ok(self.record(session_id))
    }

    async fn mark_deleted(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<bool> {
        self.check(Some(session_id))?;
        let mut records = self.records.lock();
        match records.get_mut(session_id) {
            Some(rec) if !rec.is_deleted() => {
                rec.deleted_at = Some(at);
                rec.is_active = false;
                rec.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_last_connection_at(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(session_id, |rec| {
            rec.last_connection_at = Some(at);
            rec.updated_at = at;
        })
    }

    async fn update_latest_data(
        &self,
        session_id: &SessionId,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(session_id, |rec| {
            rec.latest_data = Some(payload.clone());
            rec.updated_at = at;
        })
    }

    async fn find_stale_open_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionId>> {
        self.check(None)?;
        let mut stale: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|rec| !rec.is_deleted() && rec.activity_at() < cutoff)
            .map(|rec| rec.session_id.clone())
            .collect();
        stale.sort();
        Ok(stale)
    }
}

/// One recorded join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinEntry {
    /// Handle returned to the caller.
    pub id: JoinRecordId,
    /// Session joined.
    pub session_id: SessionId,
    /// Peer metadata captured at join time.
    pub peer: PeerMetadata,
    /// Set once the matching leave is recorded.
    pub left_at: Option<DateTime<Utc>>,
}

/// [`AuditLog`] that keeps every call in memory.
#[derive(Default)]
pub struct RecordingAuditLog {
    joins: Mutex<Vec<JoinEntry>>,
    fail_joins: AtomicBool,
    fail_leaves: AtomicBool,
}

impl RecordingAuditLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All joins recorded so far.
    pub fn joins(&self) -> Vec<JoinEntry> {
        self.joins.lock().clone()
    }

    /// Joins that have a matching leave.
    pub fn leave_count(&self) -> usize {
        self.joins.lock().iter().filter(|j| j.left_at.is_some()).count()
    }

    /// Make `record_join` fail.
    pub fn set_fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    /// Make `record_leave` fail.
    pub fn set_fail_leaves(&self, fail: bool) {
        self.fail_leaves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn record_join(
        &self,
        session_id: &SessionId,
        peer: &PeerMetadata,
        _at: DateTime<Utc>,
    ) -> Result<JoinRecordId> {
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected join failure"));
        }
        let id = JoinRecordId::new();
        self.joins.lock().push(JoinEntry {
            id: id.clone(),
            session_id: session_id.clone(),
            peer: peer.clone(),
            left_at: None,
        });
        Ok(id)
    }

    async fn record_leave(&self, record: &JoinRecordId, at: DateTime<Utc>) -> Result<()> {
        if self.fail_leaves.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected leave failure"));
        }
        let mut joins = self.joins.lock();
        let entry = joins
            .iter_mut()
            .find(|j| &j.id == record)
            .ok_or_else(|| StoreError::NotFound(record.to_string()))?;
        entry.left_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn mark_deleted_is_one_shot() {
        let store = MemorySessionStore::new();
        let id = SessionId::from("s1");
        let _ = store.create(&id, Utc::now()).await.unwrap();
        assert!(store.mark_deleted(&id, Utc::now()).await.unwrap());
        assert!(!store.mark_deleted(&id, Utc::now()).await.unwrap());
        assert!(!store.mark_deleted(&SessionId::from("missing"), Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn stale_uses_strict_cutoff() {
        let store = MemorySessionStore::new();
        let t0 = Utc::now();
        let _ = store.create(&SessionId::from("old"), t0 - Duration::hours(7)).await.unwrap();
        let _ = store.create(&SessionId::from("edge"), t0).await.unwrap();
        let stale = store.find_stale_open_sessions(t0).await.unwrap();
        assert_eq!(stale, vec![SessionId::from("old")]);
    }

    #[tokio::test]
    async fn injected_failure_is_per_session() {
        let store = MemorySessionStore::new();
        let bad = SessionId::from("bad");
        let _ = store.create(&bad, Utc::now()).await.unwrap();
        store.fail_session(&bad);
        assert_matches!(
            store.update_last_connection_at(&bad, Utc::now()).await,
            Err(StoreError::Backend(_))
        );
        assert!(store.get(&bad).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn join_then_leave() {
        let log = RecordingAuditLog::new();
        let id = log
            .record_join(&SessionId::from("s"), &PeerMetadata::default(), Utc::now())
            .await
            .unwrap();
        log.record_leave(&id, Utc::now()).await.unwrap();
        assert_eq!(log.leave_count(), 1);
        assert_matches!(
            log.record_leave(&JoinRecordId::from("nope"), Utc::now()).await,
            Err(StoreError::NotFound(_))
        );
    }
}
