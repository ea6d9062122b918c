//! In-memory storage implementation

use super::traits::*;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use evac_types::{BoundingBox, Connector, ConnectorAudit, ConnectorId, FloorLevel, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Building map as stored in a JSON seed file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapSeed {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connectors: Vec<Connector>,
}

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryMapStorage {
    nodes: Arc<RwLock<BTreeMap<NodeId, Node>>>,
    connectors: Arc<RwLock<BTreeMap<ConnectorId, Connector>>>,
    audit: Arc<RwLock<Vec<ConnectorAudit>>>,
    #[cfg(any(test, feature = "test-utils"))]
    faults: faults::FaultPlan,
}

impl InMemoryMapStorage {
    /// Create an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage hydrated from a map seed.
    ///
    /// Connectors must reference seeded nodes.
    pub fn from_seed(seed: MapSeed) -> StorageResult<Self> {
        let mut nodes = BTreeMap::new();
        for node in seed.nodes {
            if nodes.insert(node.id, node).is_some() {
                return Err(StorageError::Conflict("duplicate node in seed".to_string()));
            }
        }

        let mut connectors = BTreeMap::new();
        for connector in seed.connectors {
            for end in [connector.a, connector.b] {
                if !nodes.contains_key(&end) {
                    return Err(StorageError::InvalidData(format!(
                        "connector {} references unknown node {}",
                        connector.id, end
                    )));
                }
            }
            if connectors.insert(connector.id, connector).is_some() {
                return Err(StorageError::Conflict("duplicate connector in seed".to_string()));
            }
        }

        Ok(Self {
            nodes: Arc::new(RwLock::new(nodes)),
            connectors: Arc::new(RwLock::new(connectors)),
            ..Self::default()
        })
    }

    /// Load a JSON map seed file
    pub async fn from_seed_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {}", path.display(), e)))?;
        let seed: MapSeed = serde_json::from_str(&raw)
            .map_err(|e| StorageError::InvalidData(format!("{}: {}", path.display(), e)))?;
        Self::from_seed(seed)
    }

    /// Full connector audit trail, oldest first
    pub async fn audit_log(&self) -> Vec<ConnectorAudit> {
        self.audit.read().await.clone()
    }

    /// Snapshot of every stored node
    pub async fn all_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }

    #[cfg(any(test, feature = "test-utils"))]
    async fn check_write(&self) -> StorageResult<()> {
        self.faults.check_write().await
    }

    #[cfg(not(any(test, feature = "test-utils")))]
    async fn check_write(&self) -> StorageResult<()> {
        Ok(())
    }

    #[cfg(any(test, feature = "test-utils"))]
    async fn check_path_write(&self, id: NodeId) -> StorageResult<()> {
        self.faults.check_path_write(id).await
    }

    #[cfg(not(any(test, feature = "test-utils")))]
    async fn check_path_write(&self, _id: NodeId) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl InMemoryMapStorage {
    /// Make every subsequent write fail with a connection error
    pub async fn fail_writes(&self, fail: bool) {
        self.faults.set_fail_writes(fail).await;
    }

    /// Make evacuation-path writes fail for the listed nodes only
    pub async fn fail_path_writes_for(&self, ids: impl IntoIterator<Item = NodeId>) {
        self.faults.set_failing_paths(ids).await;
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod faults {
    use crate::error::{StorageError, StorageResult};
    use evac_types::NodeId;
    use std::collections::BTreeSet;
    use tokio::sync::RwLock;

    #[derive(Debug, Default)]
    pub(super) struct FaultPlan {
        fail_writes: RwLock<bool>,
        failing_paths: RwLock<BTreeSet<NodeId>>,
    }

    impl FaultPlan {
        pub(super) async fn set_fail_writes(&self, fail: bool) {
            *self.fail_writes.write().await = fail;
        }

        pub(super) async fn set_failing_paths(&self, ids: impl IntoIterator<Item = NodeId>) {
            *self.failing_paths.write().await = ids.into_iter().collect();
        }

        pub(super) async fn check_write(&self) -> StorageResult<()> {
            if *self.fail_writes.read().await {
                return Err(StorageError::Connection("injected write failure".to_string()));
            }
            Ok(())
        }

        pub(super) async fn check_path_write(&self, id: NodeId) -> StorageResult<()> {
            self.check_write().await?;
            if self.failing_paths.read().await.contains(&id) {
                return Err(StorageError::Query(format!(
                    "injected path write failure for node {}",
                    id
                )));
            }
            Ok(())
        }
    }
}

#[async_trait]
impl NodeStorage for InMemoryMapStorage {
    async fn read_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(&id).cloned())
    }

    async fn read_nodes_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().filter(|n| n.is_on_floor(floor)).cloned().collect())
    }

    async fn read_nodes_by_type(&self, node_type: &str) -> StorageResult<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().filter(|n| n.is_type(node_type)).cloned().collect())
    }

    async fn read_nodes_in_zone(
        &self,
        area: &BoundingBox,
        floor_lo: FloorLevel,
        floor_hi: FloorLevel,
    ) -> StorageResult<Vec<Node>> {
        let (lo, hi) = if floor_lo <= floor_hi {
            (floor_lo, floor_hi)
        } else {
            (floor_hi, floor_lo)
        };
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .filter(|n| {
                let (cx, cy) = n.bbox.centroid();
                area.contains_point(cx, cy) && n.floors().range(lo..=hi).next().is_some()
            })
            .cloned()
            .collect())
    }

    async fn insert_node(&self, node: Node) -> StorageResult<()> {
        self.check_write().await?;
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(StorageError::Conflict(format!("node {} already exists", node.id)));
        }
        nodes.insert(node.id, node);
        Ok(())
    }

    async fn write_safe_all(&self, safe: bool) -> StorageResult<u64> {
        self.check_write().await?;
        let mut nodes = self.nodes.write().await;
        for node in nodes.values_mut() {
            node.safe = safe;
        }
        Ok(nodes.len() as u64)
    }

    async fn write_safe_for_nodes(&self, ids: &[NodeId], safe: bool) -> StorageResult<u64> {
        self.check_write().await?;
        let mut nodes = self.nodes.write().await;
        let mut affected = 0;
        for id in ids {
            if let Some(node) = nodes.get_mut(id) {
                node.safe = safe;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn write_safe_for_floor(&self, floor: FloorLevel, safe: bool) -> StorageResult<u64> {
        self.check_write().await?;
        let mut nodes = self.nodes.write().await;
        let mut affected = 0;
        for node in nodes.values_mut().filter(|n| n.is_on_floor(floor)) {
            node.safe = safe;
            affected += 1;
        }
        Ok(affected)
    }

    async fn write_evacuation_path(
        &self,
        id: NodeId,
        path: Option<&[ConnectorId]>,
    ) -> StorageResult<()> {
        self.check_path_write(id).await?;
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("node {}", id)))?;
        node.evacuation_path = path.map(|p| p.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ConnectorStorage for InMemoryMapStorage {
    async fn read_connectors_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Connector>> {
        let nodes = self.nodes.read().await;
        let connectors = self.connectors.read().await;
        let on_floor = |id: &NodeId| nodes.get(id).is_some_and(|n| n.is_on_floor(floor));
        Ok(connectors
            .values()
            .filter(|c| on_floor(&c.a) && on_floor(&c.b))
            .cloned()
            .collect())
    }

    async fn insert_connector(&self, connector: Connector) -> StorageResult<()> {
        self.check_write().await?;
        let nodes = self.nodes.read().await;
        for end in [connector.a, connector.b] {
            if !nodes.contains_key(&end) {
                return Err(StorageError::InvalidData(format!(
                    "connector {} references unknown node {}",
                    connector.id, end
                )));
            }
        }
        let mut connectors = self.connectors.write().await;
        if connectors.contains_key(&connector.id) {
            return Err(StorageError::Conflict(format!(
                "connector {} already exists",
                connector.id
            )));
        }
        connectors.insert(connector.id, connector);
        Ok(())
    }

    async fn write_connector_active(
        &self,
        id: ConnectorId,
        active: bool,
        actor: &str,
    ) -> StorageResult<bool> {
        self.check_write().await?;
        let mut connectors = self.connectors.write().await;
        let mut audit = self.audit.write().await;
        let connector = connectors
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("connector {}", id)))?;
        let previous = connector.active;
        connector.active = active;
        audit.push(ConnectorAudit::new(id, previous, active, actor));
        Ok(previous)
    }

    async fn read_connector_audit(&self, id: ConnectorId) -> StorageResult<Vec<ConnectorAudit>> {
        let audit = self.audit.read().await;
        Ok(audit.iter().filter(|a| a.connector_id == id).cloned().collect())
    }
}
