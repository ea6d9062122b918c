//! Error types for evac-graph

use evac_types::{ConnectorId, FloorLevel, ModelError, NodeId};
use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data violates the building model
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

impl StorageError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Query(_))
    }
}

impl From<ModelError> for StorageError {
    fn from(err: ModelError) -> Self {
        StorageError::InvalidData(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Graph store errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Node {node} not present on floor {floor}")]
    NodeNotFound { floor: FloorLevel, node: NodeId },

    #[error("Connector {connector} not present on floor {floor}")]
    ConnectorNotFound {
        floor: FloorLevel,
        connector: ConnectorId,
    },

    #[error("Connector {connector} references node {node} absent from floor {floor}")]
    UnknownEndpoint {
        floor: FloorLevel,
        connector: ConnectorId,
        node: NodeId,
    },

    #[error("Map seed error: {0}")]
    Seed(String),
}

impl GraphError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            GraphError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;
