//! Error types for the slingshot RL pipeline

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Learner connection or protocol errors
    #[error("Learner error: {0}")]
    Learner(String),

    /// Learner did not answer within the configured timeout
    #[error("Learner timed out after {0} ms")]
    LearnerTimeout(u64),

    /// Policy network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Checkpoint or report persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RLError {
    /// Whether the error comes from an optional collaborator that the
    /// training loop can route around (learner down, learner slow).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Learner(_) | Self::LearnerTimeout(_) | Self::Io(_))
    }
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;
