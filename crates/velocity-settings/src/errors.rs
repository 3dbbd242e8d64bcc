//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a usable [`crate::VelocitySettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse failure.
        source: serde_json::Error,
    },

    /// The merged document does not fit the settings schema.
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),

    /// A value parsed but is out of range.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/velocity.json"),
            source,
        };
        assert!(err.to_string().starts_with("/etc/velocity.json is not valid JSON"));
    }

    #[test]
    fn schema_mismatch_converts_to_shape() {
        let json_err = serde_json::from_str::<u16>("\"eighty\"").unwrap_err();
        let err: SettingsError = json_err.into();
        assert_matches!(err, SettingsError::Shape(_));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("queue capacity must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "invalid settings value: queue capacity must be positive"
        );
    }
}
