//! Join-log repository: viewer join/leave audit rows.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::{JoinLogRow, format_timestamp};

/// Fields for a new join row.
pub struct NewJoinLog<'a> {
    /// Stream joined.
    pub stream_id: &'a str,
    /// Viewer `User-Agent`.
    pub user_agent: Option<&'a str>,
    /// Viewer address.
    pub ip_address: Option<&'a str>,
    /// Join time.
    pub joined_at: DateTime<Utc>,
}

/// Join-log repository. Stateless, every method takes `&Connection`.
pub struct JoinLogRepo;

impl JoinLogRepo {
    /// Insert a join row and return its id.
    pub fn record_join(conn: &Connection, entry: &NewJoinLog<'_>) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let _ = conn.execute(
            "INSERT INTO stream_join_logs (id, stream_id, joined_at, user_agent, ip_address)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                entry.stream_id,
                format_timestamp(entry.joined_at),
                entry.user_agent,
                entry.ip_address,
            ],
        )?;
        Ok(id)
    }

    /// Set `left_at` on an open join row. Returns `false` if no open row matched.
    pub fn record_leave(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE stream_join_logs SET left_at = ?2 WHERE id = ?1 AND left_at IS NULL",
            params![id, format_timestamp(at)],
        )?;
        Ok(changed == 1)
    }

    /// All join rows for a stream, oldest first.
    pub fn list_for_stream(conn: &Connection, stream_id: &str) -> Result<Vec<JoinLogRow>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM stream_join_logs WHERE stream_id = ?1 ORDER BY joined_at, id",
        )?;
        let rows = stmt
            .query_map(params![stream_id], JoinLogRow::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{StreamRepo, test_conn};

    #[test]
    fn join_then_leave() {
        let conn = test_conn();
        let now = Utc::now();
        let _ = StreamRepo::create(&conn, "abc", now).unwrap();
        let id = JoinLogRepo::record_join(
            &conn,
            &NewJoinLog {
                stream_id: "abc",
                user_agent: Some("Mozilla/5.0"),
                ip_address: Some("203.0.113.9"),
                joined_at: now,
            },
        )
        .unwrap();

        assert!(JoinLogRepo::record_leave(&conn, &id, now).unwrap());
        assert!(!JoinLogRepo::record_leave(&conn, &id, now).unwrap());

        let rows = JoinLogRepo::list_for_stream(&conn, "abc").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_agent.as_deref(), Some("Mozilla/5.0"));
        assert!(rows[0].left_at.is_some());
    }

    #[test]
    fn join_requires_existing_stream() {
        let conn = test_conn();
        let result = JoinLogRepo::record_join(
            &conn,
            &NewJoinLog {
                stream_id: "missing",
                user_agent: None,
                ip_address: None,
                joined_at: Utc::now(),
            },
        );
        assert!(result.is_err());
    }
}
