//! Connector (arc) types

use crate::error::{ModelError, Result};
use crate::ids::{ConnectorId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An undirected passage between two distinct nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConnectorRecord", into = "ConnectorRecord")]
pub struct Connector {
    pub id: ConnectorId,
    pub a: NodeId,
    pub b: NodeId,
    pub active: bool,
    /// Seconds to walk the connector; always positive
    pub traversal_time: f64,
    pub capacity: u32,
    /// People currently moving through the connector
    pub flow: u32,
}

impl Connector {
    /// Create an active connector with zero capacity and flow.
    ///
    /// Rejects self-loops and non-positive (or NaN) traversal times.
    pub fn new(id: ConnectorId, a: NodeId, b: NodeId, traversal_time: f64) -> Result<Self> {
        if a == b {
            return Err(ModelError::SelfLoop { id, node: a });
        }
        if !traversal_time.is_finite() || traversal_time <= 0.0 {
            return Err(ModelError::NonPositiveTraversalTime {
                id,
                seconds: traversal_time,
            });
        }
        Ok(Self {
            id,
            a,
            b,
            active: true,
            traversal_time,
            capacity: 0,
            flow: 0,
        })
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_flow(mut self, flow: u32) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Whether this connector joins `x` and `y`, in either direction
    pub fn connects(&self, x: NodeId, y: NodeId) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }

    /// The endpoint opposite `node`, or `None` if `node` is not an endpoint
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.a == node {
            Some(self.b)
        } else if self.b == node {
            Some(self.a)
        } else {
            None
        }
    }

    /// Whether current flow exceeds the connector's capacity, using
    /// `fallback` when no capacity is recorded
    pub fn is_overloaded(&self, fallback: u32) -> bool {
        let limit = if self.capacity == 0 { fallback } else { self.capacity };
        self.flow > limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConnectorRecord {
    #[serde(rename = "arc_id")]
    id: ConnectorId,
    #[serde(rename = "node_from")]
    a: NodeId,
    #[serde(rename = "node_to")]
    b: NodeId,
    #[serde(default = "default_active")]
    active: bool,
    traversal_time: f64,
    #[serde(default)]
    capacity: u32,
    #[serde(default)]
    flow: u32,
}

fn default_active() -> bool {
    true
}

impl TryFrom<ConnectorRecord> for Connector {
    type Error = ModelError;

    fn try_from(record: ConnectorRecord) -> Result<Self> {
        Ok(Connector::new(record.id, record.a, record.b, record.traversal_time)?
            .with_active(record.active)
            .with_capacity(record.capacity)
            .with_flow(record.flow))
    }
}

impl From<Connector> for ConnectorRecord {
    fn from(c: Connector) -> Self {
        Self {
            id: c.id,
            a: c.a,
            b: c.b,
            active: c.active,
            traversal_time: c.traversal_time,
            capacity: c.capacity,
            flow: c.flow,
        }
    }
}

/// Audit row written whenever a connector's activity changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorAudit {
    pub connector_id: ConnectorId,
    pub previous: bool,
    pub new: bool,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl ConnectorAudit {
    pub fn new(connector_id: ConnectorId, previous: bool, new: bool, actor: impl Into<String>) -> Self {
        Self {
            connector_id,
            previous,
            new,
            actor: actor.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_self_loop() {
        let err = Connector::new(ConnectorId(1), NodeId(3), NodeId(3), 2.0).unwrap_err();
        assert_eq!(
            err,
            ModelError::SelfLoop {
                id: ConnectorId(1),
                node: NodeId(3)
            }
        );
    }

    #[test]
    fn test_rejects_bad_traversal_time() {
        assert!(Connector::new(ConnectorId(1), NodeId(1), NodeId(2), 0.0).is_err());
        assert!(Connector::new(ConnectorId(1), NodeId(1), NodeId(2), -3.0).is_err());
        assert!(Connector::new(ConnectorId(1), NodeId(1), NodeId(2), f64::NAN).is_err());
    }

    #[test]
    fn test_undirected_helpers() {
        let c = Connector::new(ConnectorId(5), NodeId(1), NodeId(2), 4.0).unwrap();
        assert!(c.connects(NodeId(2), NodeId(1)));
        assert!(!c.connects(NodeId(2), NodeId(3)));
        assert_eq!(c.other_end(NodeId(2)), Some(NodeId(1)));
        assert_eq!(c.other_end(NodeId(7)), None);
    }

    #[test]
    fn test_overload_uses_fallback_when_uncapped() {
        let c = Connector::new(ConnectorId(5), NodeId(1), NodeId(2), 4.0)
            .unwrap()
            .with_flow(31);
        assert!(c.is_overloaded(30));
        assert!(!c.clone().with_capacity(40).is_overloaded(30));
    }

    #[test]
    fn test_deserialize_storage_shape() {
        let json = serde_json::json!({
            "arc_id": 12, "node_from": 1, "node_to": 2, "traversal_time": 6.5
        });
        let c: Connector = serde_json::from_value(json).unwrap();
        assert!(c.active);
        assert_eq!(c.a, NodeId(1));
        assert_eq!(c.traversal_time, 6.5);
    }
}
