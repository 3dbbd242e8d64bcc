//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial; missing fields get their compiled default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Value of `server.environment` that switches on production behavior.
pub const PRODUCTION: &str = "production";

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "sweep": { "inactivityTimeoutSecs": 3600 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VelocitySettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Per-connection relay tuning.
    pub relay: RelaySettings,
    /// Inactivity sweep schedule.
    pub sweep: SweepSettings,
    /// `SQLite` database location.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl VelocitySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.outboundQueueCapacity must be positive".into(),
            ));
        }
        if self.relay.ping_interval_secs >= self.relay.read_timeout_secs {
            return Err(SettingsError::InvalidValue(
                "relay.pingIntervalSecs must be shorter than relay.readTimeoutSecs".into(),
            ));
        }
        if self.sweep.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "sweep.intervalSecs must be positive".into(),
            ));
        }
        if self.database.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "database.poolSize must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Whether logs should be emitted as JSON lines.
    pub fn json_logs(&self) -> bool {
        self.logging.json || self.server.is_production()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by CORS.
    pub cors_allowed_origins: Vec<String>,
    /// Deployment environment name.
    pub environment: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            environment: "development".to_string(),
        }
    }
}

impl ServerSettings {
    /// Whether this is a production deployment.
    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION
    }
}

/// Per-connection relay tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Outbound queue capacity per connection, in messages.
    pub outbound_queue_capacity: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Idle read deadline, refreshed on every read.
    pub read_timeout_secs: u64,
    /// Liveness ping cadence when no application message was sent.
    pub ping_interval_secs: u64,
    /// Deadline for a single write.
    pub write_timeout_secs: u64,
    /// Deadline for background persistence and audit calls.
    pub side_effect_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_message_size: 512 * 1024,
            read_timeout_secs: 60,
            ping_interval_secs: 54,
            write_timeout_secs: 10,
            side_effect_timeout_secs: 5,
        }
    }
}

impl RelaySettings {
    /// Idle read deadline.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Ping cadence.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Per-write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Background side-effect deadline.
    pub fn side_effect_timeout(&self) -> Duration {
        Duration::from_secs(self.side_effect_timeout_secs)
    }
}

/// Inactivity sweep schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SweepSettings {
    /// Whether the sweep task runs at all.
    pub enabled: bool,
    /// Seconds between sweep ticks.
    pub interval_secs: u64,
    /// Sessions idle longer than this are closed.
    pub inactivity_timeout_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15 * 60,
            inactivity_timeout_secs: 6 * 60 * 60,
        }
    }
}

impl SweepSettings {
    /// Tick interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Inactivity threshold.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }
}

/// `SQLite` database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file path. A leading `~/` expands to `$HOME`; `:memory:`
    /// selects an in-memory database.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.velocity/velocity.db".to_string(),
            pool_size: 8,
        }
    }
}

impl DatabaseSettings {
    /// Whether the configured path names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Path with `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => crate::loader::home_dir().join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
