//! Error types shared across Tally crates

use thiserror::Error;

/// Result type alias for Tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Main error type for configuration and file-level failures
///
/// Engine-level failures (extraction, store, run-fatal) have their own types in
/// `tally-harvest`; this one covers everything that happens before or around a run.
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid key specification: {0}")]
    InvalidKeySpec(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

impl TallyError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid key specification error
    pub fn invalid_key_spec(msg: impl Into<String>) -> Self {
        Self::InvalidKeySpec(msg.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = TallyError::config("concurrency_limit must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: concurrency_limit must be greater than 0"
        );
    }

    #[test]
    fn test_toml_error_converts() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: TallyError = parsed.unwrap_err().into();
        assert!(matches!(err, TallyError::Toml(_)));
    }
}
