//! Storage trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use evac_types::{BoundingBox, Connector, ConnectorAudit, ConnectorId, FloorLevel, Node, NodeId};

/// Combined storage trait
#[async_trait]
pub trait MapStorage: NodeStorage + ConnectorStorage + Send + Sync {}

impl<T: NodeStorage + ConnectorStorage + Send + Sync> MapStorage for T {}

/// Storage for nodes
#[async_trait]
pub trait NodeStorage: Send + Sync {
    /// Get a node by ID
    async fn read_node(&self, id: NodeId) -> StorageResult<Option<Node>>;

    /// List nodes whose floor set contains `floor`
    async fn read_nodes_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Node>>;

    /// List nodes of a given type, across all floors
    async fn read_nodes_by_type(&self, node_type: &str) -> StorageResult<Vec<Node>>;

    /// List nodes whose 2-D centroid lies in `area` and whose floor set
    /// intersects `[floor_lo, floor_hi]` (bounds in either order)
    async fn read_nodes_in_zone(
        &self,
        area: &BoundingBox,
        floor_lo: FloorLevel,
        floor_hi: FloorLevel,
    ) -> StorageResult<Vec<Node>>;

    /// Insert a new node
    async fn insert_node(&self, node: Node) -> StorageResult<()>;

    /// Set the safe flag on every node; returns rows affected
    async fn write_safe_all(&self, safe: bool) -> StorageResult<u64>;

    /// Set the safe flag on the listed nodes in one transaction; returns rows affected
    async fn write_safe_for_nodes(&self, ids: &[NodeId], safe: bool) -> StorageResult<u64>;

    /// Set the safe flag on every node of a floor; returns rows affected
    async fn write_safe_for_floor(&self, floor: FloorLevel, safe: bool) -> StorageResult<u64>;

    /// Replace a node's evacuation path (`None` clears it)
    async fn write_evacuation_path(
        &self,
        id: NodeId,
        path: Option<&[ConnectorId]>,
    ) -> StorageResult<()>;
}

/// Storage for connectors and their audit trail
#[async_trait]
pub trait ConnectorStorage: Send + Sync {
    /// List connectors whose both endpoints belong to `floor`
    async fn read_connectors_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Connector>>;

    /// Insert a new connector
    async fn insert_connector(&self, connector: Connector) -> StorageResult<()>;

    /// Set a connector's activity and append an audit row in one
    /// transaction; returns the previous state
    async fn write_connector_active(
        &self,
        id: ConnectorId,
        active: bool,
        actor: &str,
    ) -> StorageResult<bool>;

    /// Audit rows for one connector, oldest first
    async fn read_connector_audit(&self, id: ConnectorId) -> StorageResult<Vec<ConnectorAudit>>;
}
