//! Async collaborator adapters over the `SQLite` pool.
//!
//! [`SqliteStore`] implements both [`SessionStore`] and [`AuditLog`]. Every
//! call checks out a pooled connection on the blocking thread pool, runs one
//! repository function, and maps [`DatabaseError`] into [`StoreError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use velocity_core::errors::Result as StoreResult;
use velocity_core::{
    AuditLog, FeatureFlags, JoinRecordId, PeerMetadata, SessionId, SessionRecord, SessionStore,
};

use crate::connection::{ConnectionPool, PooledConnection};
use crate::errors::{DatabaseError, Result};
use crate::migrations::run_migrations;
use crate::repositories::{FeatureFlagRepo, JoinLogRepo, NewJoinLog, StreamRepo};

/// `SQLite`-backed lifecycle store and audit log.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Wrap a pool and bring its schema up to date.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let _ = run_migrations(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a pooled connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&PooledConnection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> StoreResult<SessionRecord> {
        let id = session_id.to_string();
        let row = self.with_conn(move |conn| StreamRepo::create(conn, &id, at)).await?;
        Ok(row.into_record()?)
    }

    async fn get(&self, session_id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        let id = session_id.to_string();
        let row = self.with_conn(move |conn| StreamRepo::get(conn, &id)).await?;
        Ok(row.map(crate::row_types::StreamRow::into_record).transpose()?)
    }

    async fn mark_deleted(&self, session_id: &SessionId, at: DateTime<Utc>) -> StoreResult<bool> {
        let id = session_id.to_string();
        Ok(self
            .with_conn(move |conn| StreamRepo::mark_deleted(conn, &id, at))
            .await?)
    }

    async fn update_last_connection_at(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            if StreamRepo::update_last_connection_at(conn, &id, at)? {
                Ok(())
            } else {
                Err(DatabaseError::NotFound(id))
            }
        })
        .await?;
        Ok(())
    }

    async fn update_latest_data(
        &self,
        session_id: &SessionId,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let id = session_id.to_string();
        let payload = payload.clone();
        self.with_conn(move |conn| {
            if StreamRepo::update_latest_data(conn, &id, &payload, at)? {
                Ok(())
            } else {
                Err(DatabaseError::NotFound(id))
            }
        })
        .await?;
        Ok(())
    }

    async fn find_stale_open_sessions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<SessionId>> {
        let ids = self
            .with_conn(move |conn| StreamRepo::find_stale_open(conn, cutoff))
            .await?;
        Ok(ids.into_iter().map(SessionId::from_string).collect())
    }

    async fn feature_flags(&self) -> StoreResult<FeatureFlags> {
        Ok(self.with_conn(|conn| FeatureFlagRepo::get(conn)).await?)
    }
}

#[async_trait]
impl AuditLog for SqliteStore {
    async fn record_join(
        &self,
        session_id: &SessionId,
        peer: &PeerMetadata,
        at: DateTime<Utc>,
    ) -> StoreResult<JoinRecordId> {
        let id = session_id.to_string();
        let peer = peer.clone();
        let record = self
            .with_conn(move |conn| {
                JoinLogRepo::record_join(
                    conn,
                    &NewJoinLog {
                        stream_id: &id,
                        user_agent: peer.user_agent.as_deref(),
                        ip_address: peer.ip_address.as_deref(),
                        joined_at: at,
                    },
                )
            })
            .await?;
        Ok(JoinRecordId::from_string(record))
    }

    async fn record_leave(&self, record: &JoinRecordId, at: DateTime<Utc>) -> StoreResult<()> {
        let id = record.to_string();
        self.with_conn(move |conn| {
            if JoinLogRepo::record_leave(conn, &id, at)? {
                Ok(())
            } else {
                Err(DatabaseError::NotFound(id))
            }
        })
        .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
