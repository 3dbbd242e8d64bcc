//! # velocity-core
//!
//! Foundation types shared by every velocity crate:
//!
//! - **Branded IDs**: `SessionId`, `ConnectionId`, `JoinRecordId` as newtypes
//! - **Wire protocol**: the `{type, payload}` envelope, relay → client messages,
//!   and the tagged viewer-count event
//! - **Collaborators**: `SessionStore` and `AuditLog` traits the relay calls into
//! - **Errors**: `StoreError` for collaborator failures
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use errors::StoreError;
pub use ids::{ConnectionId, JoinRecordId, SessionId};
pub use protocol::{Envelope, ServerMessage, ViewerChange, ViewerCountEvent, ViewerCountUpdate};
pub use traits::{AuditLog, FeatureFlags, PeerMetadata, SessionRecord, SessionStore};
