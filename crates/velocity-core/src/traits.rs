//! Collaborator interfaces the relay calls into.
//!
//! The relay core never talks to a database directly. It consumes a
//! [`SessionStore`] for lifecycle state and an [`AuditLog`] for join/leave
//! records; `velocity-store` provides the `SQLite` implementations and
//! [`crate::testing`] provides in-memory doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::ids::{JoinRecordId, SessionId};

/// Durable view of one session as kept by the lifecycle store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session identifier.
    #[serde(rename = "streamId")]
    pub session_id: SessionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Set once the session has been explicitly closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Whether the session is still open.
    pub is_active: bool,
    /// Most recent telemetry payload from the producer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_data: Option<Value>,
    /// When the session last lost its final connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connection_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// A freshly created, open session.
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            is_active: true,
            latest_data: None,
            last_connection_at: None,
        }
    }

    /// Whether the session has been closed and must refuse new connections.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some() || !self.is_active
    }

    /// Timestamp the inactivity sweep compares against its cutoff.
    pub fn activity_at(&self) -> DateTime<Utc> {
        self.last_connection_at.unwrap_or(self.created_at)
    }
}

/// Subscriber-side connection metadata recorded with a join.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// `User-Agent` header, when present.
    pub user_agent: Option<String>,
    /// Best-effort client address.
    pub ip_address: Option<String>,
}

/// Client feature flags served to the mobile app.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Live streaming is available to clients.
    pub enable_live_streams: bool,
    /// iCloud storage is available to clients.
    #[serde(rename = "enableiCloudStorage")]
    pub enable_icloud_storage: bool,
    /// `CarPlay` is available to clients.
    pub enable_car_play: bool,
}

/// Durable session lifecycle state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an open session record.
    async fn create(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<SessionRecord>;

    /// Fetch a session record.
    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Close a session. Returns `false` if it is missing or already closed.
    async fn mark_deleted(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<bool>;

    /// Record when the session last held a connection.
    async fn update_last_connection_at(&self, session_id: &SessionId, at: DateTime<Utc>)
    -> Result<()>;

    /// Store the producer's latest telemetry payload.
    async fn update_latest_data(
        &self,
        session_id: &SessionId,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Open, undeleted sessions whose activity timestamp is strictly older than `cutoff`.
    async fn find_stale_open_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionId>>;

    /// Client feature flags. Stores without a flags table report all-off.
    async fn feature_flags(&self) -> Result<FeatureFlags> {
        Ok(FeatureFlags::default())
    }
}

/// Append-only join/leave audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record a subscriber join and return a handle for the matching leave.
    async fn record_join(
        &self,
        session_id: &SessionId,
        peer: &PeerMetadata,
        at: DateTime<Utc>,
    ) -> Result<JoinRecordId>;

    /// Close a join record.
    async fn record_leave(&self, record: &JoinRecordId, at: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn new_record_is_open() {
        let now = Utc::now();
        let rec = SessionRecord::new(SessionId::from("s"), now);
        assert!(!rec.is_deleted());
        assert_eq!(rec.activity_at(), now);
    }

    #[test]
    fn activity_prefers_last_connection() {
        let now = Utc::now();
        let mut rec = SessionRecord::new(SessionId::from("s"), now);
        rec.last_connection_at = Some(now + Duration::minutes(5));
        assert_eq!(rec.activity_at(), now + Duration::minutes(5));
    }

    #[test]
    fn deleted_or_inactive_counts_as_deleted() {
        let now = Utc::now();
        let mut rec = SessionRecord::new(SessionId::from("s"), now);
        rec.is_active = false;
        assert!(rec.is_deleted());
        rec.is_active = true;
        rec.deleted_at = Some(now);
        assert!(rec.is_deleted());
    }

    #[test]
    fn feature_flags_wire_names() {
        let v = serde_json::to_value(FeatureFlags::default()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "enableLiveStreams": false,
                "enableiCloudStorage": false,
                "enableCarPlay": false
            })
        );
    }

    #[test]
    fn record_serializes_with_stream_id() {
        let rec = SessionRecord::new(SessionId::from("abc"), Utc::now());
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["streamId"], "abc");
        assert_eq!(v["isActive"], true);
        assert!(v.get("deletedAt").is_none());
    }
}
