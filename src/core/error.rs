//! Custom error types for tabpilot
//!
//! Provides a unified error handling system across all modules.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Message patterns that identify quota/rate exhaustion in provider errors.
static RATE_LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b429\b|rate[\s_-]?limit|too many requests|quota|resource[\s_-]?exhausted")
        .expect("rate limit pattern is valid")
});

/// Main error type for tabpilot operations
#[derive(Error, Debug)]
pub enum PilotError {
    /// Raw failure reported by a completion client
    #[error("Oracle error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Oracle {
        status: Option<u16>,
        message: String,
    },

    /// The gateway gave up on a completion
    #[error("Oracle failed after {attempts} attempt(s): {last}")]
    OracleFatal { attempts: u32, last: String },

    /// Browser driver errors
    #[error("Browser error: {0}")]
    Driver(String),

    /// A task failed while being executed against the browser
    #[error("Task {task_id} failed: {cause}")]
    Execution {
        task_id: String,
        cause: String,
        /// Diagnostic capture taken at the moment of failure, if any
        artifact: Option<String>,
    },

    /// Malformed task or evaluation payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler-level per-task timeout
    #[error("Task timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// agent-browser not installed
    #[error("agent-browser not found. Install with: npm install -g agent-browser && agent-browser install")]
    DriverUnavailable,

    /// Model not available
    #[error("Model '{0}' not available in Ollama. Run: ollama pull {0}")]
    ModelNotFound(String),
}

/// Convenience Result type for tabpilot operations
pub type Result<T> = std::result::Result<T, PilotError>;

impl PilotError {
    /// Create a raw oracle error
    pub fn oracle(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Oracle {
            status,
            message: msg.into(),
        }
    }

    /// Create a driver error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Oracle { status, .. } => *status,
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the error signature indicates quota or rate exhaustion
    pub fn is_rate_limited(&self) -> bool {
        if self.status() == Some(429) {
            return true;
        }
        RATE_LIMIT_PATTERN.is_match(&self.to_string())
    }

    /// Whether retrying the same request cannot help (client-side 4xx)
    pub fn is_non_retryable(&self) -> bool {
        match self.status() {
            Some(s) => (400..500).contains(&s) && !matches!(s, 408 | 425 | 429),
            None => matches!(self, Self::ModelNotFound(_) | Self::Config(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_by_status() {
        assert!(PilotError::oracle(Some(429), "slow down").is_rate_limited());
        assert!(!PilotError::oracle(Some(500), "boom").is_rate_limited());
    }

    #[test]
    fn test_rate_limit_by_message() {
        assert!(PilotError::oracle(None, "RESOURCE_EXHAUSTED: try later").is_rate_limited());
        assert!(PilotError::oracle(None, "Quota exceeded for model").is_rate_limited());
        assert!(!PilotError::oracle(None, "connection reset").is_rate_limited());
    }

    #[test]
    fn test_non_retryable() {
        assert!(PilotError::oracle(Some(401), "bad key").is_non_retryable());
        assert!(!PilotError::oracle(Some(408), "timeout").is_non_retryable());
        assert!(!PilotError::oracle(Some(503), "unavailable").is_non_retryable());
        assert!(!PilotError::oracle(None, "reset").is_non_retryable());
    }
}
