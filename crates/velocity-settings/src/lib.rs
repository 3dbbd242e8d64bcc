//! # velocity-settings
//!
//! Configuration with layered sources for the velocity relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`VelocitySettings::default()`])
//! 2. **User file** at `~/.velocity/settings.json`, deep-merged over defaults
//! 3. **Environment variables** such as `PORT` and `VELOCITY_*` (highest priority)
//!
//! The binary applies its CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
