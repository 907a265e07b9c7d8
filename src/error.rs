//! Domain-specific error types for stock-tally

use thiserror::Error;

/// Main error type for the stock-tally engine and its collaborators
#[derive(Error, Debug)]
pub enum StockError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StockError {
    /// Shorthand for the only fatal class of error
    pub fn config(message: impl Into<String>) -> Self {
        StockError::Config {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StockError::Config { .. })
    }
}

impl From<anyhow::Error> for StockError {
    fn from(err: anyhow::Error) -> Self {
        StockError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StockError {
    fn from(err: serde_json::Error) -> Self {
        StockError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for StockError {
    fn from(err: reqwest::Error) -> Self {
        StockError::Transport {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<std::io::Error> for StockError {
    fn from(err: std::io::Error) -> Self {
        StockError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for StockError {
    fn from(err: toml::de::Error) -> Self {
        StockError::Config {
            message: format!("Invalid config file: {}", err),
        }
    }
}

/// Result type alias for stock-tally operations
pub type Result<T> = std::result::Result<T, StockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(StockError::config("missing BOT_TOKEN").is_fatal());
        assert!(
            !StockError::Transport {
                message: "connection reset".into()
            }
            .is_fatal()
        );
        assert!(
            !StockError::Timeout {
                operation: "fallback".into(),
                timeout_ms: 10
            }
            .is_fatal()
        );
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = StockError::Timeout {
            operation: "fallback extraction".into(),
            timeout_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Timeout error: fallback extraction timed out after 1500ms"
        );
    }
}
