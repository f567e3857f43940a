//! Error types for the QR generator worker

use thiserror::Error;

/// Result type alias for core operations
pub type QrGenResult<T> = Result<T, QrGenError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum QrGenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl QrGenError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_message() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err = QrGenError::invalid_url("not a url", parse_err);
        assert!(matches!(err, QrGenError::InvalidUrl { ref url, .. } if url == "not a url"));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_config_helper() {
        let err = QrGenError::config("cachePrefix must not be empty");
        assert_eq!(
            err.to_string(),
            "Configuration error: cachePrefix must not be empty"
        );
    }
}
