//! PostgreSQL storage implementation

use super::traits::*;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evac_types::{BoundingBox, Connector, ConnectorAudit, ConnectorId, FloorLevel, Node, NodeId};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const NODE_COLUMNS: &str = "node_id, x1, x2, y1, y2, z1, z2, floor_level, node_type, \
                            current_occupancy, capacity, safe, evacuation_path";

const ARC_COLUMNS_QUALIFIED: &str = "a.arc_id, a.initial_node_id, a.final_node_id, a.active, \
                                     a.traversal_time, a.capacity, a.flow";

/// PostgreSQL-backed map storage
#[derive(Debug, Clone)]
pub struct PostgresMapStorage {
    pool: PgPool,
}

impl PostgresMapStorage {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    /// Create storage from an existing pool
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                node_id BIGINT PRIMARY KEY,
                x1 DOUBLE PRECISION NOT NULL,
                x2 DOUBLE PRECISION NOT NULL,
                y1 DOUBLE PRECISION NOT NULL,
                y2 DOUBLE PRECISION NOT NULL,
                z1 DOUBLE PRECISION NOT NULL DEFAULT 0,
                z2 DOUBLE PRECISION NOT NULL DEFAULT 0,
                floor_level INTEGER[] NOT NULL CHECK (cardinality(floor_level) > 0),
                node_type TEXT NOT NULL,
                current_occupancy INTEGER NOT NULL DEFAULT 0,
                capacity INTEGER NOT NULL DEFAULT 0,
                safe BOOLEAN NOT NULL DEFAULT TRUE,
                evacuation_path JSONB
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS nodes_node_type ON nodes(node_type);"#,
            r#"CREATE INDEX IF NOT EXISTS nodes_floor_level ON nodes USING GIN (floor_level);"#,
            r#"
            CREATE TABLE IF NOT EXISTS arcs (
                arc_id BIGINT PRIMARY KEY,
                initial_node_id BIGINT NOT NULL REFERENCES nodes(node_id),
                final_node_id BIGINT NOT NULL REFERENCES nodes(node_id),
                active BOOLEAN NOT NULL DEFAULT TRUE,
                traversal_time DOUBLE PRECISION NOT NULL CHECK (traversal_time > 0),
                capacity INTEGER NOT NULL DEFAULT 0,
                flow INTEGER NOT NULL DEFAULT 0,
                CHECK (initial_node_id <> final_node_id)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS arc_status_log (
                id BIGSERIAL PRIMARY KEY,
                arc_id BIGINT NOT NULL REFERENCES arcs(arc_id),
                previous_state BOOLEAN NOT NULL,
                new_state BOOLEAN NOT NULL,
                modified_by TEXT NOT NULL,
                modified_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS arc_status_log_arc_id ON arc_status_log(arc_id);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
        }

        Ok(())
    }

    async fn fetch_nodes(&self, sql: String, bind: NodeFilter<'_>) -> StorageResult<Vec<Node>> {
        let query = sqlx::query(&sql);
        let query = match bind {
            NodeFilter::Floor(floor) => query.bind(floor),
            NodeFilter::Type(node_type) => query.bind(node_type.to_string()),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_node).collect()
    }
}

enum NodeFilter<'a> {
    Floor(FloorLevel),
    Type(&'a str),
}

fn db_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StorageError::Connection(e.to_string())
        }
        other => StorageError::Query(other.to_string()),
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn row_to_node(row: &PgRow) -> StorageResult<Node> {
    let id: i64 = row.try_get("node_id").map_err(db_err)?;
    let bbox = BoundingBox::new(
        row.try_get("x1").map_err(db_err)?,
        row.try_get("x2").map_err(db_err)?,
        row.try_get("y1").map_err(db_err)?,
        row.try_get("y2").map_err(db_err)?,
        row.try_get("z1").map_err(db_err)?,
        row.try_get("z2").map_err(db_err)?,
    );
    let floors: Vec<i32> = row.try_get("floor_level").map_err(db_err)?;
    let node_type: String = row.try_get("node_type").map_err(db_err)?;
    let occupancy: i32 = row.try_get("current_occupancy").map_err(db_err)?;
    let capacity: i32 = row.try_get("capacity").map_err(db_err)?;
    let safe: bool = row.try_get("safe").map_err(db_err)?;
    let path: Option<Value> = row.try_get("evacuation_path").map_err(db_err)?;

    let mut node = Node::new(NodeId(id), bbox, floors, node_type)?
        .with_occupancy(to_u32(occupancy))
        .with_capacity(to_u32(capacity))
        .with_safe(safe);
    node.evacuation_path = path
        .map(serde_json::from_value::<Vec<ConnectorId>>)
        .transpose()
        .map_err(|e| StorageError::InvalidData(format!("node {} path: {}", id, e)))?;
    Ok(node)
}

fn row_to_connector(row: &PgRow) -> StorageResult<Connector> {
    let id: i64 = row.try_get("arc_id").map_err(db_err)?;
    let a: i64 = row.try_get("initial_node_id").map_err(db_err)?;
    let b: i64 = row.try_get("final_node_id").map_err(db_err)?;
    let active: bool = row.try_get("active").map_err(db_err)?;
    let traversal_time: f64 = row.try_get("traversal_time").map_err(db_err)?;
    let capacity: i32 = row.try_get("capacity").map_err(db_err)?;
    let flow: i32 = row.try_get("flow").map_err(db_err)?;

    Ok(
        Connector::new(ConnectorId(id), NodeId(a), NodeId(b), traversal_time)?
            .with_active(active)
            .with_capacity(to_u32(capacity))
            .with_flow(to_u32(flow)),
    )
}

#[async_trait]
impl NodeStorage for PostgresMapStorage {
    async fn read_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE node_id = $1", NODE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_node).transpose()
    }

    async fn read_nodes_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE $1 = ANY(floor_level) ORDER BY node_id",
            NODE_COLUMNS
        );
        self.fetch_nodes(sql, NodeFilter::Floor(floor)).await
    }

    async fn read_nodes_by_type(&self, node_type: &str) -> StorageResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE node_type = $1 ORDER BY node_id",
            NODE_COLUMNS
        );
        self.fetch_nodes(sql, NodeFilter::Type(node_type)).await
    }

    async fn read_nodes_in_zone(
        &self,
        area: &BoundingBox,
        floor_lo: FloorLevel,
        floor_hi: FloorLevel,
    ) -> StorageResult<Vec<Node>> {
        let (xlo, xhi) = (area.x1.min(area.x2), area.x1.max(area.x2));
        let (ylo, yhi) = (area.y1.min(area.y2), area.y1.max(area.y2));
        let (flo, fhi) = (floor_lo.min(floor_hi), floor_lo.max(floor_hi));
        let sql = format!(
            r#"
            SELECT {} FROM nodes
             WHERE (x1 + x2) / 2 BETWEEN $1 AND $2
               AND (y1 + y2) / 2 BETWEEN $3 AND $4
               AND EXISTS (SELECT 1 FROM unnest(floor_level) f WHERE f BETWEEN $5 AND $6)
             ORDER BY node_id
            "#,
            NODE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(xlo)
            .bind(xhi)
            .bind(ylo)
            .bind(yhi)
            .bind(flo)
            .bind(fhi)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_node).collect()
    }

    async fn insert_node(&self, node: Node) -> StorageResult<()> {
        let floors: Vec<i32> = node.floors().iter().copied().collect();
        let path = node
            .evacuation_path
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let occupancy = i32::try_from(node.current_occupancy).unwrap_or(i32::MAX);
        let capacity = i32::try_from(node.capacity).unwrap_or(i32::MAX);

        let result = sqlx::query(
            r#"
            INSERT INTO nodes
                (node_id, x1, x2, y1, y2, z1, z2, floor_level, node_type,
                 current_occupancy, capacity, safe, evacuation_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (node_id) DO NOTHING
            "#,
        )
        .bind(node.id.value())
        .bind(node.bbox.x1)
        .bind(node.bbox.x2)
        .bind(node.bbox.y1)
        .bind(node.bbox.y2)
        .bind(node.bbox.z1)
        .bind(node.bbox.z2)
        .bind(floors)
        .bind(&node.node_type)
        .bind(occupancy)
        .bind(capacity)
        .bind(node.safe)
        .bind(path)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!("node {} already exists", node.id)));
        }
        Ok(())
    }

    async fn write_safe_all(&self, safe: bool) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query("UPDATE nodes SET safe = $1")
            .bind(safe)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn write_safe_for_nodes(&self, ids: &[NodeId], safe: bool) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let raw: Vec<i64> = ids.iter().map(|id| id.value()).collect();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query("UPDATE nodes SET safe = $1 WHERE node_id = ANY($2)")
            .bind(safe)
            .bind(raw)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn write_safe_for_floor(&self, floor: FloorLevel, safe: bool) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query("UPDATE nodes SET safe = $1 WHERE $2 = ANY(floor_level)")
            .bind(safe)
            .bind(floor)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn write_evacuation_path(
        &self,
        id: NodeId,
        path: Option<&[ConnectorId]>,
    ) -> StorageResult<()> {
        let value = path
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let result = sqlx::query("UPDATE nodes SET evacuation_path = $1 WHERE node_id = $2")
            .bind(value)
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("node {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectorStorage for PostgresMapStorage {
    async fn read_connectors_on_floor(&self, floor: FloorLevel) -> StorageResult<Vec<Connector>> {
        let sql = format!(
            r#"
            SELECT {} FROM arcs a
              JOIN nodes n1 ON n1.node_id = a.initial_node_id
              JOIN nodes n2 ON n2.node_id = a.final_node_id
             WHERE $1 = ANY(n1.floor_level) AND $1 = ANY(n2.floor_level)
             ORDER BY a.arc_id
            "#,
            ARC_COLUMNS_QUALIFIED
        );
        let rows = sqlx::query(&sql)
            .bind(floor)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_connector).collect()
    }

    async fn insert_connector(&self, connector: Connector) -> StorageResult<()> {
        let capacity = i32::try_from(connector.capacity).unwrap_or(i32::MAX);
        let flow = i32::try_from(connector.flow).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO arcs
                (arc_id, initial_node_id, final_node_id, active, traversal_time, capacity, flow)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (arc_id) DO NOTHING
            "#,
        )
        .bind(connector.id.value())
        .bind(connector.a.value())
        .bind(connector.b.value())
        .bind(connector.active)
        .bind(connector.traversal_time)
        .bind(capacity)
        .bind(flow)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "connector {} already exists",
                connector.id
            )));
        }
        Ok(())
    }

    async fn write_connector_active(
        &self,
        id: ConnectorId,
        active: bool,
        actor: &str,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT active FROM arcs WHERE arc_id = $1 FOR UPDATE")
            .bind(id.value())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StorageError::NotFound(format!("connector {}", id)))?;
        let previous: bool = row.try_get("active").map_err(db_err)?;

        sqlx::query("UPDATE arcs SET active = $1 WHERE arc_id = $2")
            .bind(active)
            .bind(id.value())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO arc_status_log (arc_id, previous_state, new_state, modified_by, modified_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.value())
        .bind(previous)
        .bind(active)
        .bind(actor)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(previous)
    }

    async fn read_connector_audit(&self, id: ConnectorId) -> StorageResult<Vec<ConnectorAudit>> {
        let rows = sqlx::query(
            r#"
            SELECT previous_state, new_state, modified_by, modified_at
              FROM arc_status_log
             WHERE arc_id = $1
             ORDER BY id
            "#,
        )
        .bind(id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let at: DateTime<Utc> = row.try_get("modified_at").map_err(db_err)?;
                Ok(ConnectorAudit {
                    connector_id: id,
                    previous: row.try_get("previous_state").map_err(db_err)?,
                    new: row.try_get("new_state").map_err(db_err)?,
                    actor: row.try_get("modified_by").map_err(db_err)?,
                    at,
                })
            })
            .collect()
    }
}
