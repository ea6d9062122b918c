//! Graph store
//!
//! Owns one lazily-loaded [`FloorGraph`] per floor level. Each floor slot is
//! guarded by its own lock; cross-floor sweeps visit slots one at a time and
//! never hold two floor locks at once.
//!
//! Bulk safety updates go to storage first. The cached graphs are only
//! touched after the durable write succeeded.

use crate::error::{GraphError, GraphResult};
use crate::graph::FloorGraph;
use crate::storage::MapStorage;
use evac_types::{BoundingBox, Connector, ConnectorId, FloorLevel, Node, NodeId};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Default coordinate tolerance for node deduplication
pub const DEFAULT_DEDUP_TOLERANCE: f64 = 0.5;

type FloorSlot = Arc<RwLock<Option<Arc<FloorGraph>>>>;

/// Outcome of [`GraphStore::add_node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeInsert {
    /// The node was stored
    Inserted(NodeId),
    /// A node with a matching bounding box already exists
    Duplicate(NodeId),
}

impl NodeInsert {
    pub fn id(&self) -> NodeId {
        match self {
            NodeInsert::Inserted(id) | NodeInsert::Duplicate(id) => *id,
        }
    }
}

/// Cache of floor graphs backed by map storage
pub struct GraphStore {
    storage: Arc<dyn MapStorage>,
    floors: DashMap<FloorLevel, FloorSlot>,
    dedup_tolerance: f64,
}

impl GraphStore {
    pub fn new(storage: Arc<dyn MapStorage>) -> Self {
        Self::with_tolerance(storage, DEFAULT_DEDUP_TOLERANCE)
    }

    pub fn with_tolerance(storage: Arc<dyn MapStorage>, dedup_tolerance: f64) -> Self {
        Self {
            storage,
            floors: DashMap::new(),
            dedup_tolerance,
        }
    }

    /// Underlying storage
    pub fn storage(&self) -> &Arc<dyn MapStorage> {
        &self.storage
    }

    fn slot(&self, floor: FloorLevel) -> FloorSlot {
        self.floors.entry(floor).or_default().value().clone()
    }

    /// Every slot, ascending by floor. DashMap guards are released before
    /// the caller awaits any floor lock.
    fn slots(&self) -> Vec<(FloorLevel, FloorSlot)> {
        let mut slots: Vec<_> = self
            .floors
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        slots.sort_by_key(|(floor, _)| *floor);
        slots
    }

    async fn load(&self, floor: FloorLevel) -> GraphResult<FloorGraph> {
        let nodes = self.storage.read_nodes_on_floor(floor).await?;
        let connectors = self.storage.read_connectors_on_floor(floor).await?;
        let graph = FloorGraph::from_parts(floor, nodes, connectors)?;
        debug!(
            floor,
            nodes = graph.node_count(),
            connectors = graph.connector_count(),
            "Loaded floor graph"
        );
        Ok(graph)
    }

    /// Graph for a floor, loading it from storage on first use.
    ///
    /// Concurrent callers for the same floor share a single load; the
    /// returned snapshot is never observed half-updated.
    pub async fn get(&self, floor: FloorLevel) -> GraphResult<Arc<FloorGraph>> {
        let slot = self.slot(floor);
        {
            let guard = slot.read().await;
            if let Some(graph) = guard.as_ref() {
                return Ok(graph.clone());
            }
        }

        let mut guard = slot.write().await;
        if let Some(graph) = guard.as_ref() {
            return Ok(graph.clone());
        }
        let graph = Arc::new(self.load(floor).await?);
        *guard = Some(graph.clone());
        Ok(graph)
    }

    /// Floors currently cached
    pub fn cached_floors(&self) -> Vec<FloorLevel> {
        self.slots()
            .into_iter()
            .map(|(floor, _)| floor)
            .collect()
    }

    /// Drop every cached graph; the next `get` reloads from storage
    pub async fn reload(&self) {
        for (_, slot) in self.slots() {
            *slot.write().await = None;
        }
        info!("Floor graph cache cleared");
    }

    /// Apply `mutate` to every cached graph, one floor lock at a time.
    /// Returns how many graphs reported a change.
    async fn for_each_cached(&self, mut mutate: impl FnMut(&mut FloorGraph) -> bool) -> usize {
        let mut changed = 0;
        for (_, slot) in self.slots() {
            let mut guard = slot.write().await;
            if let Some(graph) = guard.as_mut() {
                if mutate(Arc::make_mut(graph)) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Mark every node safe or unsafe; returns rows affected in storage
    pub async fn set_safe_all(&self, safe: bool) -> GraphResult<u64> {
        let affected = self.storage.write_safe_all(safe).await.map_err(|e| {
            error!(safe, error = %e, "Bulk safety update failed");
            e
        })?;
        self.for_each_cached(|graph| {
            graph.nodes_mut().for_each(|n| n.safe = safe);
            true
        })
        .await;
        debug!(safe, affected, "Set safe flag on all nodes");
        Ok(affected)
    }

    /// Mark the listed nodes safe or unsafe; returns rows affected in storage
    pub async fn set_safe_for_nodes(&self, ids: &[NodeId], safe: bool) -> GraphResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let affected = self
            .storage
            .write_safe_for_nodes(ids, safe)
            .await
            .map_err(|e| {
                error!(safe, count = ids.len(), error = %e, "Node safety update failed");
                e
            })?;
        let wanted: BTreeSet<NodeId> = ids.iter().copied().collect();
        self.for_each_cached(|graph| {
            let mut touched = false;
            for node in graph.nodes_mut().filter(|n| wanted.contains(&n.id)) {
                node.safe = safe;
                touched = true;
            }
            touched
        })
        .await;
        debug!(safe, affected, "Set safe flag on listed nodes");
        Ok(affected)
    }

    /// Mark every node of a floor safe or unsafe; returns rows affected in storage.
    ///
    /// Nodes spanning several floors are updated in every cached graph
    /// that holds them.
    pub async fn set_safe_for_floor(&self, floor: FloorLevel, safe: bool) -> GraphResult<u64> {
        let affected = self
            .storage
            .write_safe_for_floor(floor, safe)
            .await
            .map_err(|e| {
                error!(floor, safe, error = %e, "Floor safety update failed");
                e
            })?;
        self.for_each_cached(|graph| {
            let mut touched = false;
            for node in graph.nodes_mut().filter(|n| n.is_on_floor(floor)) {
                node.safe = safe;
                touched = true;
            }
            touched
        })
        .await;
        debug!(floor, safe, affected, "Set safe flag on floor");
        Ok(affected)
    }

    /// Change a connector's activity; returns the previous state.
    ///
    /// The change is persisted together with an audit row naming `actor`.
    pub async fn set_connector_active(
        &self,
        floor: FloorLevel,
        id: ConnectorId,
        active: bool,
        actor: &str,
    ) -> GraphResult<bool> {
        let graph = self.get(floor).await?;
        if graph.connector(id).is_none() {
            return Err(GraphError::ConnectorNotFound {
                floor,
                connector: id,
            });
        }

        let previous = self.storage.write_connector_active(id, active, actor).await?;
        self.for_each_cached(|graph| match graph.connector_mut(id) {
            Some(connector) => {
                connector.active = active;
                true
            }
            None => false,
        })
        .await;

        info!(
            floor,
            connector_id = %id,
            previous,
            new = active,
            actor,
            "Connector activity changed"
        );
        Ok(previous)
    }

    /// Deactivate every active connector of a floor that is listed in
    /// `broken` or carries more flow than its capacity (`max_arc_capacity`
    /// stands in for connectors without a recorded capacity).
    ///
    /// Returns the deactivated ids.
    pub async fn refresh_connector_activity(
        &self,
        floor: FloorLevel,
        broken: &[ConnectorId],
        max_arc_capacity: u32,
        actor: &str,
    ) -> GraphResult<Vec<ConnectorId>> {
        let graph = self.get(floor).await?;
        let targets: Vec<ConnectorId> = graph
            .connectors()
            .filter(|c| c.active)
            .filter(|c| broken.contains(&c.id) || c.is_overloaded(max_arc_capacity))
            .map(|c| c.id)
            .collect();

        for id in &targets {
            self.set_connector_active(floor, *id, false, actor).await?;
        }
        if !targets.is_empty() {
            info!(floor, count = targets.len(), "Deactivated broken or overloaded connectors");
        }
        Ok(targets)
    }

    /// Record a node's current occupancy on every cached graph holding it.
    /// In-memory only; returns how many graphs were updated.
    pub async fn set_occupancy(&self, id: NodeId, occupancy: u32) -> usize {
        self.for_each_cached(|graph| match graph.node_mut(id) {
            Some(node) => {
                node.current_occupancy = occupancy;
                true
            }
            None => false,
        })
        .await
    }

    /// Persist a node's evacuation path and mirror it in the cache
    pub async fn set_evacuation_path(
        &self,
        id: NodeId,
        path: Option<Vec<ConnectorId>>,
    ) -> GraphResult<()> {
        self.storage
            .write_evacuation_path(id, path.as_deref())
            .await?;
        self.for_each_cached(|graph| match graph.node_mut(id) {
            Some(node) => {
                node.evacuation_path = path.clone();
                true
            }
            None => false,
        })
        .await;
        Ok(())
    }

    /// Add a node unless one with a matching bounding box already exists
    /// on any of its floors
    pub async fn add_node(&self, node: Node) -> GraphResult<NodeInsert> {
        for floor in node.floors().iter().copied() {
            let graph = self.get(floor).await?;
            if let Some(existing) = graph.find_duplicate(&node.bbox, self.dedup_tolerance) {
                debug!(floor, node_id = %node.id, existing = %existing, "Duplicate node skipped");
                return Ok(NodeInsert::Duplicate(existing));
            }
        }

        self.storage.insert_node(node.clone()).await?;
        let id = node.id;
        let floors = node.floors().clone();
        for (floor, slot) in self.slots() {
            if !floors.contains(&floor) {
                continue;
            }
            let mut guard = slot.write().await;
            if let Some(graph) = guard.as_mut() {
                Arc::make_mut(graph).insert_node(node.clone());
            }
        }
        info!(node_id = %id, "Node added");
        Ok(NodeInsert::Inserted(id))
    }

    /// Add a connector to a floor; both endpoints must be present in that
    /// floor's graph
    pub async fn add_edge(&self, floor: FloorLevel, connector: Connector) -> GraphResult<()> {
        let graph = self.get(floor).await?;
        for end in [connector.a, connector.b] {
            if !graph.contains_node(end) {
                warn!(floor, connector_id = %connector.id, node_id = %end, "Rejected edge with unknown endpoint");
                return Err(GraphError::UnknownEndpoint {
                    floor,
                    connector: connector.id,
                    node: end,
                });
            }
        }

        self.storage.insert_connector(connector.clone()).await?;
        for (_, slot) in self.slots() {
            let mut guard = slot.write().await;
            if let Some(graph) = guard.as_mut() {
                if graph.contains_node(connector.a) && graph.contains_node(connector.b) {
                    Arc::make_mut(graph).add_connector(connector.clone())?;
                }
            }
        }
        info!(floor, connector_id = %connector.id, "Connector added");
        Ok(())
    }

    /// Look a node up in storage
    pub async fn node(&self, id: NodeId) -> GraphResult<Option<Node>> {
        Ok(self.storage.read_node(id).await?)
    }

    /// All nodes of a type, across all floors
    pub async fn nodes_by_type(&self, node_type: &str) -> GraphResult<Vec<Node>> {
        Ok(self.storage.read_nodes_by_type(node_type).await?)
    }

    /// Nodes whose centroid lies in `area` on a floor in `[floor_lo, floor_hi]`
    pub async fn nodes_in_zone(
        &self,
        area: &BoundingBox,
        floor_lo: FloorLevel,
        floor_hi: FloorLevel,
    ) -> GraphResult<Vec<Node>> {
        Ok(self
            .storage
            .read_nodes_in_zone(area, floor_lo, floor_hi)
            .await?)
    }

    /// Exit nodes of a floor, ascending by id
    pub async fn exit_nodes(&self, floor: FloorLevel, exit_types: &[String]) -> GraphResult<Vec<NodeId>> {
        Ok(self.get(floor).await?.nodes_of_types(exit_types))
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("cached_floors", &self.cached_floors())
            .field("dedup_tolerance", &self.dedup_tolerance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryMapStorage, MapSeed, NodeStorage};
    use evac_types::NODE_TYPE_STAIRS;

    fn node(id: i64, floors: &[FloorLevel], node_type: &str) -> Node {
        let x = id as f64 * 10.0;
        Node::new(
            NodeId(id),
            BoundingBox::flat(x, x + 5.0, 0.0, 5.0),
            floors.iter().copied(),
            node_type,
        )
        .unwrap()
    }

    fn conn(id: i64, a: i64, b: i64) -> Connector {
        Connector::new(ConnectorId(id), NodeId(a), NodeId(b), 2.0).unwrap()
    }

    fn building() -> Arc<InMemoryMapStorage> {
        Arc::new(
            InMemoryMapStorage::from_seed(MapSeed {
                nodes: vec![
                    node(1, &[0], "classroom"),
                    node(2, &[0, 1], NODE_TYPE_STAIRS),
                    node(3, &[1], "classroom"),
                    node(4, &[0], "outdoor"),
                ],
                connectors: vec![conn(10, 1, 2), conn(11, 2, 3), conn(12, 1, 4)],
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_get_caches_instance() {
        let store = GraphStore::new(building());
        let first = store.get(0).await.unwrap();
        let second = store.get(0).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.node_count(), 3);
        assert_eq!(store.cached_floors(), vec![0]);
    }

    #[tokio::test]
    async fn test_concurrent_get_loads_once() {
        let store = Arc::new(GraphStore::new(building()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get(1).await.unwrap() })
            })
            .collect();
        let mut graphs = Vec::new();
        for handle in handles {
            graphs.push(handle.await.unwrap());
        }
        assert!(graphs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_floor_update_reaches_spanning_node_on_other_floor() {
        let store = GraphStore::new(building());
        store.get(0).await.unwrap();
        store.get(1).await.unwrap();

        let affected = store.set_safe_for_floor(0, false).await.unwrap();
        assert_eq!(affected, 3);

        let upper = store.get(1).await.unwrap();
        assert!(!upper.node(NodeId(2)).unwrap().safe);
        assert!(upper.node(NodeId(3)).unwrap().safe);
    }

    #[tokio::test]
    async fn test_failed_storage_write_leaves_cache_untouched() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let before = store.get(0).await.unwrap();

        storage.fail_writes(true).await;
        let err = store.set_safe_all(false).await.unwrap_err();
        assert!(err.is_transient());

        let after = store.get(0).await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.nodes().all(|n| n.safe));
    }

    #[tokio::test]
    async fn test_connector_sweep_deactivates_broken_and_overloaded() {
        let storage = Arc::new(
            InMemoryMapStorage::from_seed(MapSeed {
                nodes: vec![node(1, &[0], "a"), node(2, &[0], "b"), node(3, &[0], "c")],
                connectors: vec![
                    conn(10, 1, 2),
                    conn(11, 2, 3).with_flow(40),
                    conn(12, 1, 3).with_flow(40).with_capacity(50),
                ],
            })
            .unwrap(),
        );
        let store = GraphStore::new(storage.clone());

        let deactivated = store
            .refresh_connector_activity(0, &[ConnectorId(10)], 30, "MapManager")
            .await
            .unwrap();
        assert_eq!(deactivated, vec![ConnectorId(10), ConnectorId(11)]);

        let graph = store.get(0).await.unwrap();
        assert!(!graph.connector(ConnectorId(10)).unwrap().active);
        assert!(graph.connector(ConnectorId(12)).unwrap().active);

        let log = storage.audit_log().await;
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|row| row.actor == "MapManager" && row.previous && !row.new));
    }

    #[tokio::test]
    async fn test_add_node_deduplicates_by_bbox() {
        let store = GraphStore::new(building());
        let mut twin = node(1, &[0], "classroom");
        twin.id = NodeId(99);
        twin.bbox.x1 += 0.1;
        let outcome = store.add_node(twin).await.unwrap();
        assert_eq!(outcome, NodeInsert::Duplicate(NodeId(1)));

        let fresh = node(50, &[0], "corridor");
        assert_eq!(store.add_node(fresh).await.unwrap(), NodeInsert::Inserted(NodeId(50)));
        assert!(store.get(0).await.unwrap().contains_node(NodeId(50)));
    }

    #[tokio::test]
    async fn test_add_edge_rejects_node_from_other_floor() {
        let store = GraphStore::new(building());
        let err = store.add_edge(0, conn(20, 1, 3)).await.unwrap_err();
        assert!(matches!(err, GraphError::UnknownEndpoint { node: NodeId(3), .. }));

        store.add_edge(0, conn(21, 2, 4)).await.unwrap();
        let graph = store.get(0).await.unwrap();
        assert!(graph.connector_between(NodeId(4), NodeId(2)).is_some());
    }

    #[tokio::test]
    async fn test_evacuation_path_persisted_and_cached() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        store.get(0).await.unwrap();

        store
            .set_evacuation_path(NodeId(1), Some(vec![ConnectorId(12)]))
            .await
            .unwrap();
        let stored = storage.read_node(NodeId(1)).await.unwrap().unwrap();
        assert_eq!(stored.evacuation_path, Some(vec![ConnectorId(12)]));
        let cached = store.get(0).await.unwrap();
        assert_eq!(
            cached.node(NodeId(1)).unwrap().evacuation_path,
            Some(vec![ConnectorId(12)])
        );
    }

    #[tokio::test]
    async fn test_occupancy_updates_every_cached_copy() {
        let store = GraphStore::new(building());
        store.get(0).await.unwrap();
        store.get(1).await.unwrap();
        assert_eq!(store.set_occupancy(NodeId(2), 17).await, 2);
        assert_eq!(store.get(1).await.unwrap().node(NodeId(2)).unwrap().current_occupancy, 17);
    }
}
