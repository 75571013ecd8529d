//! # Cachekeeper Error Types
//!
//! Centralized error handling for the cache lifecycle core.
//!
//! Nothing in this crate is fatal to the process: every variant degrades a
//! single operation, a single instance or a single tick.

use thiserror::Error;

use crate::config::validation::ValidationReport;

/// Result type alias for cachekeeper operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Core error types for cachekeeper
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation on a store that has been destroyed
    #[error("Store closed: {0}")]
    StoreClosed(String),

    /// Unknown cache instance
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Instance registered twice
    #[error("Instance already exists: {0}")]
    InstanceExists(String),

    /// Configuration rejected by validation rules
    #[error("Validation failed for '{instance}': {}", .report.summary())]
    Validation {
        instance: String,
        report: ValidationReport,
    },

    /// Configuration errors (source, format, env override)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Batch / prewarm errors
    #[error("Batch error: {0}")]
    Batch(String),

    /// Prewarm task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Operation exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Event sink delivery errors
    #[error("Sink error: {0}")]
    Sink(String),

    /// Listener callback errors
    #[error("Listener error: {0}")]
    Listener(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl CacheError {
    /// Create a new store closed error
    pub fn store_closed(instance: impl Into<String>) -> Self {
        Self::StoreClosed(instance.into())
    }

    /// Create a new instance not found error
    pub fn instance_not_found(instance: impl Into<String>) -> Self {
        Self::InstanceNotFound(instance.into())
    }

    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new batch error
    pub fn batch(msg: impl Into<String>) -> Self {
        Self::Batch(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a new generic/other error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error only means the store went away (treated as "no data")
    pub fn is_store_closed(&self) -> bool {
        matches!(self, Self::StoreClosed(_))
    }

    /// Validation report, if this is a validation failure
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self {
            Self::Validation { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for CacheError {
    fn from(err: toml::de::Error) -> Self {
        CacheError::Configuration(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for CacheError {
    fn from(err: toml::ser::Error) -> Self {
        CacheError::Configuration(format!("TOML serialize error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_closed_display() {
        let err = CacheError::store_closed("user");
        assert_eq!(err.to_string(), "Store closed: user");
        assert!(err.is_store_closed());
    }

    #[test]
    fn test_other_errors_are_not_store_closed() {
        assert!(!CacheError::instance_not_found("api").is_store_closed());
        assert!(CacheError::batch("x").validation_report().is_none());
    }
}
