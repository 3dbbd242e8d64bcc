//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! These represent the raw row shape. Conversion to public types
//! ([`SessionRecord`]) happens here so repositories stay SQL-only.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use velocity_core::{SessionId, SessionRecord};

use crate::errors::{DatabaseError, Result};

/// Format a timestamp for storage.
///
/// Millisecond precision with a `Z` suffix keeps every stored value the same
/// width, so lexicographic order in SQL equals temporal order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidRow(format!("timestamp {raw:?}: {e}")))
}

fn parse_optional(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

/// Raw row from the `streams` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamRow {
    /// Stream (session) id.
    pub stream_id: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
    /// Deletion timestamp (null while open).
    pub deleted_at: Option<String>,
    /// 1 while open, 0 once closed.
    pub is_active: bool,
    /// Latest telemetry as a JSON string.
    pub latest_data: Option<String>,
    /// When the stream last lost its final connection.
    pub last_connection_at: Option<String>,
}

impl StreamRow {
    /// Map a `SELECT *` row.
    pub fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            stream_id: row.get("stream_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            deleted_at: row.get("deleted_at")?,
            is_active: row.get("is_active")?,
            latest_data: row.get("latest_data")?,
            last_connection_at: row.get("last_connection_at")?,
        })
    }

    /// Decode into the collaborator-facing record.
    pub fn into_record(self) -> Result<SessionRecord> {
        let latest_data = self
            .latest_data
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;
        Ok(SessionRecord {
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            deleted_at: parse_optional(self.deleted_at.as_deref())?,
            last_connection_at: parse_optional(self.last_connection_at.as_deref())?,
            is_active: self.is_active,
            latest_data,
            session_id: SessionId::from_string(self.stream_id),
        })
    }
}

/// Raw row from the `stream_join_logs` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinLogRow {
    /// Join record id (UUID v7).
    pub id: String,
    /// Stream joined.
    pub stream_id: String,
    /// Join timestamp.
    pub joined_at: String,
    /// Leave timestamp (null while connected).
    pub left_at: Option<String>,
    /// Viewer `User-Agent`.
    pub user_agent: Option<String>,
    /// Viewer address.
    pub ip_address: Option<String>,
}

impl JoinLogRow {
    /// Map a `SELECT *` row.
    pub fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            stream_id: row.get("stream_id")?,
            joined_at: row.get("joined_at")?,
            left_at: row.get("left_at")?,
            user_agent: row.get("user_agent")?,
            ip_address: row.get("ip_address")?,
        })
    }
}
