//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! parameter, so every operation is a plain function from
//! (connection, input) to output.

pub mod feature_flags;
pub mod join_log;
pub mod stream;

pub use feature_flags::FeatureFlagRepo;
pub use join_log::{JoinLogRepo, NewJoinLog};
pub use stream::StreamRepo;

#[cfg(test)]
pub(crate) fn test_conn() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    let _ = crate::migrations::run_migrations(&conn).unwrap();
    conn
}
