//! Error types for evac-daemon

use evac_graph::{GraphError, StorageError};
use evac_rules::RulesError;
use thiserror::Error;

/// Message transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Publish to '{queue}' failed: {reason}")]
    PublishFailed { queue: String, reason: String },

    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::PublishFailed { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised while processing one inbound message
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Payload that can never be processed
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Rules error: {0}")]
    Rules(#[from] RulesError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Whether redelivering the message may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            CoordinatorError::Graph(e) => e.is_transient(),
            CoordinatorError::Rules(e) => e.is_transient(),
            CoordinatorError::Transport(e) => e.is_transient(),
            CoordinatorError::Malformed(_) | CoordinatorError::Serialization(_) => false,
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Daemon startup and lifecycle errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker '{0}' terminated abnormally")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
