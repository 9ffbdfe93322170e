//! Error taxonomy shared by every Subflow crate.

use std::path::PathBuf;

/// All failures surfaced by the lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum SubflowError {
    /// Missing or unreadable rules, tiers or other configuration input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A message template file does not exist.
    #[error("Template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    /// Update targeted a subscriber that does not exist.
    #[error("Subscriber not found: {0}")]
    NotFound(String),

    /// Outbound messaging or asset provider failure.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Persisted state could not be parsed.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A numeric condition was evaluated against a non-numeric value.
    #[error("Cannot compare field '{field}' numerically: {value}")]
    TypeConversion { field: String, value: String },

    /// A recognised subscriber field carried a value of the wrong type.
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// The lifecycle event feed is missing or malformed.
    #[error("Event source error: {0}")]
    EventSource(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubflowError {
    /// Whether the failure belongs to a single delivery attempt and may be
    /// skipped by batch workflows.
    pub fn is_transient(&self) -> bool {
        matches!(self, SubflowError::Delivery(_))
    }

    /// Whether the failure comes from configuration inputs (rules, tiers,
    /// templates).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SubflowError::Config(_) | SubflowError::TemplateNotFound(_)
        )
    }
}

/// Result alias used throughout Subflow.
pub type Result<T> = std::result::Result<T, SubflowError>;
