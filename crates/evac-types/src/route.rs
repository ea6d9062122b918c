//! Computed evacuation routes

use crate::ids::{ConnectorId, NodeId};
use serde::{Deserialize, Serialize};

/// An ordered connector sequence from a source node to an exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub source: NodeId,
    pub exit: NodeId,
    pub connectors: Vec<ConnectorId>,
    /// Sum of the traversal times of `connectors`
    pub total_secs: f64,
}

impl Route {
    /// Route for a source that is already an exit
    pub fn trivial(node: NodeId) -> Self {
        Self {
            source: node,
            exit: node,
            connectors: Vec::new(),
            total_secs: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn hops(&self) -> usize {
        self.connectors.len()
    }
}
