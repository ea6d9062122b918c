//! Model validation errors

use crate::ids::{ConnectorId, NodeId};
use thiserror::Error;

/// Errors raised when a building record violates its invariants
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Node {0} has an empty floor set")]
    EmptyFloorSet(NodeId),

    #[error("Connector {id} joins node {node} to itself")]
    SelfLoop { id: ConnectorId, node: NodeId },

    #[error("Connector {id} has non-positive traversal time {seconds}")]
    NonPositiveTraversalTime { id: ConnectorId, seconds: f64 },

    #[error("Invalid node label: {0:?}")]
    InvalidNodeLabel(String),
}

/// Result type for model construction
pub type Result<T> = std::result::Result<T, ModelError>;
