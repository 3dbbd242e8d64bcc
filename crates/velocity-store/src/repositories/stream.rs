//! Stream repository: lifecycle state for each session.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::errors::Result;
use crate::row_types::{StreamRow, format_timestamp};

/// Stream repository. Stateless, every method takes `&Connection`.
pub struct StreamRepo;

impl StreamRepo {
    /// Insert an open stream.
    pub fn create(conn: &Connection, stream_id: &str, at: DateTime<Utc>) -> Result<StreamRow> {
        let now = format_timestamp(at);
        let _ = conn.execute(
            "INSERT INTO streams (stream_id, created_at, updated_at, is_active)
             VALUES (?1, ?2, ?2, 1)",
            params![stream_id, now],
        )?;
        Ok(StreamRow {
            stream_id: stream_id.to_string(),
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
            is_active: true,
            latest_data: None,
            last_connection_at: None,
        })
    }

    /// Get a stream by id.
    pub fn get(conn: &Connection, stream_id: &str) -> Result<Option<StreamRow>> {
        let row = conn
            .query_row(
                "SELECT * FROM streams WHERE stream_id = ?1",
                params![stream_id],
                StreamRow::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Close an open stream. Returns `false` if it is missing or already closed.
    pub fn mark_deleted(conn: &Connection, stream_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE streams SET deleted_at = ?2, updated_at = ?2, is_active = 0
             WHERE stream_id = ?1 AND deleted_at IS NULL AND is_active = 1",
            params![stream_id, format_timestamp(at)],
        )?;
        Ok(changed == 1)
    }

    /// Record the last-connection timestamp. Returns `false` if the row is missing.
    pub fn update_last_connection_at(
        conn: &Connection,
        stream_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let now = format_timestamp(at);
        let changed = conn.execute(
            "UPDATE streams SET last_connection_at = ?2, updated_at = ?2 WHERE stream_id = ?1",
            params![stream_id, now],
        )?;
        Ok(changed == 1)
    }

    /// Store the latest telemetry payload. Returns `false` if the row is missing.
    pub fn update_latest_data(
        conn: &Connection,
        stream_id: &str,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let json = serde_json::to_string(payload)?;
        let changed = conn.execute(
            "UPDATE streams SET latest_data = ?2, updated_at = ?3 WHERE stream_id = ?1",
            params![stream_id, json, format_timestamp(at)],
        )?;
        Ok(changed == 1)
    }

    /// Open, undeleted streams whose last activity is strictly before `cutoff`.
    ///
    /// Activity is `last_connection_at`, or `created_at` when no connection
    /// has been recorded.
    pub fn find_stale_open(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT stream_id FROM streams
             WHERE is_active = 1
               AND deleted_at IS NULL
               AND COALESCE(last_connection_at, created_at) < ?1
             ORDER BY stream_id",
        )?;
        let ids = stmt
            .query_map(params![format_timestamp(cutoff)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::repositories::test_conn;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn create_and_get() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "abc", t0()).unwrap();
        let row = StreamRepo::get(&conn, "abc").unwrap().unwrap();
        assert!(row.is_active);
        assert!(row.deleted_at.is_none());
        let rec = row.into_record().unwrap();
        assert_eq!(rec.created_at, t0());
    }

    #[test]
    fn get_missing_is_none() {
        let conn = test_conn();
        assert!(StreamRepo::get(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_create_fails() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "abc", t0()).unwrap();
        assert!(StreamRepo::create(&conn, "abc", t0()).is_err());
    }

    #[test]
    fn mark_deleted_only_once() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "abc", t0()).unwrap();
        assert!(StreamRepo::mark_deleted(&conn, "abc", t0()).unwrap());
        assert!(!StreamRepo::mark_deleted(&conn, "abc", t0()).unwrap());
        assert!(!StreamRepo::mark_deleted(&conn, "missing", t0()).unwrap());
        let rec = StreamRepo::get(&conn, "abc").unwrap().unwrap().into_record().unwrap();
        assert!(rec.is_deleted());
        assert_eq!(rec.deleted_at, Some(t0()));
    }

    #[test]
    fn latest_data_round_trips() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "abc", t0()).unwrap();
        let payload = json!({"currentSpeedKmh": 190.3, "car": {"name": "GT"}});
        assert!(StreamRepo::update_latest_data(&conn, "abc", &payload, t0()).unwrap());
        let rec = StreamRepo::get(&conn, "abc").unwrap().unwrap().into_record().unwrap();
        assert_eq!(rec.latest_data, Some(payload));
        assert!(!StreamRepo::update_latest_data(&conn, "missing", &json!({}), t0()).unwrap());
    }

    #[test]
    fn stale_uses_creation_when_never_connected() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "old", t0() - Duration::hours(7)).unwrap();
        let _ = StreamRepo::create(&conn, "new", t0()).unwrap();
        let stale = StreamRepo::find_stale_open(&conn, t0() - Duration::hours(6)).unwrap();
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[test]
    fn stale_prefers_last_connection() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "revived", t0() - Duration::hours(10)).unwrap();
        let _ = StreamRepo::update_last_connection_at(&conn, "revived", t0()).unwrap();
        let stale = StreamRepo::find_stale_open(&conn, t0() - Duration::hours(6)).unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn stale_cutoff_is_strict() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "edge", t0()).unwrap();
        assert!(StreamRepo::find_stale_open(&conn, t0()).unwrap().is_empty());
        let later = t0() + Duration::milliseconds(1);
        assert_eq!(StreamRepo::find_stale_open(&conn, later).unwrap(), vec!["edge"]);
    }

    #[test]
    fn stale_skips_deleted() {
        let conn = test_conn();
        let _ = StreamRepo::create(&conn, "gone", t0() - Duration::days(1)).unwrap();
        let _ = StreamRepo::mark_deleted(&conn, "gone", t0()).unwrap();
        assert!(StreamRepo::find_stale_open(&conn, t0()).unwrap().is_empty());
    }
}
