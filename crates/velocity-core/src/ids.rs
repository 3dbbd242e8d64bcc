//! Branded ID newtypes for type safety.
//!
//! A session id and a connection id are both strings on the wire, but they
//! must never be confused in the registry. Each is a newtype around `String`.
//!
//! - [`SessionId`] is opaque and assigned externally; [`SessionId::generate`]
//!   produces the 64-hex-char form handed out by the HTTP API.
//! - [`ConnectionId`] and [`JoinRecordId`] are UUID v7 (time-ordered).

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of random bytes behind a generated session id.
const SESSION_ID_BYTES: usize = 32;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Opaque identifier shared by one producer and its subscribers.
    SessionId
}

branded_id! {
    /// Unique identifier for one physical connection.
    ConnectionId
}

branded_id! {
    /// Handle returned by the audit log for a recorded join.
    JoinRecordId
}

impl SessionId {
    /// Generate a fresh 64-character lowercase hex id from 32 random bytes.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; SESSION_ID_BYTES] = rand::random();
        let hex = bytes
            .iter()
            .fold(String::with_capacity(SESSION_ID_BYTES * 2), |mut s, b| {
                let _ = write!(s, "{b:02x}");
                s
            });
        Self(hex)
    }
}

impl ConnectionId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinRecordId {
    /// Create a new random ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for JoinRecordId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
