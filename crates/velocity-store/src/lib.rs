//! # velocity-store
//!
//! `SQLite` backend for the session lifecycle store and the viewer audit log.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and foreign keys applied to
//!   every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.
//! - **[`row_types`]**: raw row structs and timestamp encoding.
//! - **[`repositories`]**: stateless repositories, one per table.
//! - **[`store`]**: [`SqliteStore`], the async `SessionStore` + `AuditLog`
//!   implementation the relay consumes.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod row_types;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{DatabaseError, Result};
pub use store::SqliteStore;
