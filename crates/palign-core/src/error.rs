//! Error types for palign.

use thiserror::Error;

/// Result type alias for palign operations.
pub type Result<T> = std::result::Result<T, PAlignError>;

/// Main error type for palign operations.
#[derive(Error, Debug)]
pub enum PAlignError {
    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset loading or access errors.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Prompt template errors.
    #[error("Template error: {0}")]
    Template(String),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HuggingFace Hub errors.
    #[error("Hub error: {0}")]
    Hub(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for PAlignError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for PAlignError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
