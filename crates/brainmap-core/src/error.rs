//! Error types for Brainmap

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid graph name: {0}")]
    InvalidGraphName(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("storage error: {graph} - {message}")]
    Storage { graph: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(graph: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            graph: graph.into(),
            message: message.into(),
        }
    }
}
