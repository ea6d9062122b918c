//! Per-floor graph model
//!
//! A [`FloorGraph`] holds every node whose floor set includes the floor, and
//! every connector whose both endpoints are present. Connectors are
//! undirected; the adjacency index is kept symmetric.

use crate::error::{GraphError, GraphResult};
use evac_types::{BoundingBox, Connector, ConnectorId, FloorLevel, Node, NodeId};
use std::collections::{BTreeMap, BTreeSet};

/// Nodes and connectors of one floor
#[derive(Debug, Clone, Default)]
pub struct FloorGraph {
    floor: FloorLevel,
    nodes: BTreeMap<NodeId, Node>,
    connectors: BTreeMap<ConnectorId, Connector>,
    adjacency: BTreeMap<NodeId, BTreeSet<ConnectorId>>,
}

impl FloorGraph {
    /// Create an empty graph for a floor
    pub fn new(floor: FloorLevel) -> Self {
        Self {
            floor,
            ..Self::default()
        }
    }

    /// Build a graph from stored records.
    ///
    /// Fails if a connector references a node that is not in `nodes`.
    pub fn from_parts(
        floor: FloorLevel,
        nodes: impl IntoIterator<Item = Node>,
        connectors: impl IntoIterator<Item = Connector>,
    ) -> GraphResult<Self> {
        let mut graph = Self::new(floor);
        for node in nodes {
            graph.insert_node(node);
        }
        for connector in connectors {
            graph.add_connector(connector)?;
        }
        Ok(graph)
    }

    pub fn floor(&self) -> FloorLevel {
        self.floor
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connector(&self, id: ConnectorId) -> Option<&Connector> {
        self.connectors.get(&id)
    }

    pub fn connector_mut(&mut self, id: ConnectorId) -> Option<&mut Connector> {
        self.connectors.get_mut(&id)
    }

    pub fn connectors(&self) -> impl Iterator<Item = &Connector> {
        self.connectors.values()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Insert or replace a node, keeping its incident connectors
    pub fn insert_node(&mut self, node: Node) {
        self.adjacency.entry(node.id).or_default();
        self.nodes.insert(node.id, node);
    }

    /// Add a connector whose endpoints are both present
    pub fn add_connector(&mut self, connector: Connector) -> GraphResult<()> {
        for end in [connector.a, connector.b] {
            if !self.nodes.contains_key(&end) {
                return Err(GraphError::UnknownEndpoint {
                    floor: self.floor,
                    connector: connector.id,
                    node: end,
                });
            }
        }
        if let Some(old) = self.connectors.remove(&connector.id) {
            self.unlink(&old);
        }
        self.adjacency.entry(connector.a).or_default().insert(connector.id);
        self.adjacency.entry(connector.b).or_default().insert(connector.id);
        self.connectors.insert(connector.id, connector);
        Ok(())
    }

    /// Remove a node together with its incident connectors
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        if let Some(incident) = self.adjacency.remove(&id) {
            for cid in incident {
                if let Some(connector) = self.connectors.remove(&cid) {
                    self.unlink(&connector);
                }
            }
        }
        Some(node)
    }

    pub fn remove_connector(&mut self, id: ConnectorId) -> Option<Connector> {
        let connector = self.connectors.remove(&id)?;
        self.unlink(&connector);
        Some(connector)
    }

    fn unlink(&mut self, connector: &Connector) {
        for end in [connector.a, connector.b] {
            if let Some(set) = self.adjacency.get_mut(&end) {
                set.remove(&connector.id);
            }
        }
    }

    /// Connectors incident to `id`, each paired with its opposite endpoint
    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = (&Connector, NodeId)> + '_ {
        self.adjacency
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(move |cid| {
                let connector = self.connectors.get(cid)?;
                Some((connector, connector.other_end(id)?))
            })
    }

    /// Cheapest connector joining `x` and `y` in either direction
    pub fn connector_between(&self, x: NodeId, y: NodeId) -> Option<&Connector> {
        self.neighbors(x)
            .filter(|(_, other)| *other == y)
            .map(|(c, _)| c)
            .min_by(|l, r| {
                l.traversal_time
                    .total_cmp(&r.traversal_time)
                    .then(l.id.cmp(&r.id))
            })
    }

    /// Union another graph into this one.
    ///
    /// Nodes already present are kept as they are.
    pub fn merge(&mut self, other: &FloorGraph) {
        for node in other.nodes() {
            if !self.nodes.contains_key(&node.id) {
                self.insert_node(node.clone());
            }
        }
        for connector in other.connectors() {
            if !self.connectors.contains_key(&connector.id) {
                // endpoints were just merged
                let _ = self.add_connector(connector.clone());
            }
        }
    }

    /// Keep only connectors matching `keep`
    pub fn retain_connectors(&mut self, mut keep: impl FnMut(&Connector) -> bool) {
        let dropped: Vec<ConnectorId> = self
            .connectors
            .values()
            .filter(|c| !keep(c))
            .map(|c| c.id)
            .collect();
        for id in dropped {
            self.remove_connector(id);
        }
    }

    /// Keep only nodes matching `keep`, dropping incident connectors of the rest
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(&Node) -> bool) {
        let dropped: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !keep(n))
            .map(|n| n.id)
            .collect();
        for id in dropped {
            self.remove_node(id);
        }
    }

    /// First node whose bounding box matches `bbox` within `tolerance`
    pub fn find_duplicate(&self, bbox: &BoundingBox, tolerance: f64) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.bbox.approx_eq(bbox, tolerance))
            .map(|n| n.id)
    }

    /// Ids of nodes whose type is one of `types`, ascending
    pub fn nodes_of_types(&self, types: &[String]) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| types.iter().any(|t| n.is_type(t)))
            .map(|n| n.id)
            .collect()
    }
}
