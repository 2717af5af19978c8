//! Error types for the streaming engine

use thiserror::Error;

/// Main error type for the world streaming engine
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid world parameters, or parameters that disagree with a stored world index.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored index or section payload could not be decoded.
    #[error("Corrupt data in '{name}': {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Terrain generation failed for section ({x}, {y})")]
    Generation { x: i32, y: i32 },

    #[error("Section ({x}, {y}): {reason}")]
    SectionState { x: i32, y: i32, reason: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
