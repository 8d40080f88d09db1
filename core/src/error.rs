use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Persisted bytes could not be decoded back into an index.
    #[error("corrupt index data: {0}")]
    Corrupt(String),

    /// Rejected at startup; the only fatal class of error.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("index not found: {0}")]
    MissingIndex(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        EngineError::Corrupt(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        EngineError::InvalidConfig(msg.into())
    }

    pub fn missing_index<S: Into<String>>(msg: S) -> Self {
        EngineError::MissingIndex(msg.into())
    }
}
