//! Server configuration.

use std::time::Duration;

use velocity_settings::VelocitySettings;

/// Per-connection pump tuning.
#[derive(Clone, Debug)]
pub struct PumpConfig {
    /// Outbound queue capacity in messages.
    pub queue_capacity: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Idle deadline for reads; refreshed by any inbound frame including pongs.
    pub read_timeout: Duration,
    /// Interval between pings when no application frame was written.
    pub ping_interval: Duration,
    /// Deadline for a single write.
    pub write_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_message_size: 512 * 1024,
            read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Inactivity sweep schedule.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    /// Time between sweep ticks.
    pub interval: Duration,
    /// Sessions idle for longer than this are evicted.
    pub inactivity_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            inactivity_timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Origins allowed by CORS.
    pub cors_allowed_origins: Vec<String>,
    /// Connection pump tuning.
    pub pump: PumpConfig,
    /// Sweep schedule; `None` disables the sweep.
    pub sweep: Option<SweepConfig>,
    /// Deadline for background store and audit calls.
    pub side_effect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            cors_allowed_origins: Vec::new(),
            pump: PumpConfig::default(),
            sweep: Some(SweepConfig::default()),
            side_effect_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &VelocitySettings) -> Self {
        let relay = &settings.relay;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            cors_allowed_origins: settings.server.cors_allowed_origins.clone(),
            pump: PumpConfig {
                queue_capacity: relay.outbound_queue_capacity,
                max_message_size: relay.max_message_size,
                read_timeout: relay.read_timeout(),
                ping_interval: relay.ping_interval(),
                write_timeout: relay.write_timeout(),
            },
            sweep: settings.sweep.enabled.then(|| SweepConfig {
                interval: settings.sweep.interval(),
                inactivity_timeout: settings.sweep.inactivity_timeout(),
            }),
            side_effect_timeout: relay.side_effect_timeout(),
        }
    }
}
