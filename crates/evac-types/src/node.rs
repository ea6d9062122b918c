//! Node types
//!
//! A node is a discrete location in the building. Connector nodes such as
//! stairwells list every floor they reach.

use crate::error::{ModelError, Result};
use crate::ids::{ConnectorId, FloorLevel, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Node type of outdoor assembly points
pub const NODE_TYPE_OUTDOOR: &str = "outdoor";

/// Node type of stairwells
pub const NODE_TYPE_STAIRS: &str = "stairs";

/// Axis-aligned bounding box in model coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
    #[serde(default)]
    pub z1: f64,
    #[serde(default)]
    pub z2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, x2: f64, y1: f64, y2: f64, z1: f64, z2: f64) -> Self {
        Self { x1, x2, y1, y2, z1, z2 }
    }

    /// Box with a zero-height z extent
    pub fn flat(x1: f64, x2: f64, y1: f64, y2: f64) -> Self {
        Self::new(x1, x2, y1, y2, 0.0, 0.0)
    }

    /// 2-D centroid (mean of the x and y extents)
    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Whether a 2-D point lies inside the box, edges included.
    /// Reversed extents (`x1 > x2`) are normalized first.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        let (xlo, xhi) = ordered(self.x1, self.x2);
        let (ylo, yhi) = ordered(self.y1, self.y2);
        xlo <= x && x <= xhi && ylo <= y && y <= yhi
    }

    /// Whether every coordinate is within `tolerance` of `other`'s
    pub fn approx_eq(&self, other: &BoundingBox, tolerance: f64) -> bool {
        (self.x1 - other.x1).abs() <= tolerance
            && (self.x2 - other.x2).abs() <= tolerance
            && (self.y1 - other.y1).abs() <= tolerance
            && (self.y2 - other.y2).abs() <= tolerance
            && (self.z1 - other.z1).abs() <= tolerance
            && (self.z2 - other.z2).abs() <= tolerance
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A location in the building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodeRecord", into = "NodeRecord")]
pub struct Node {
    /// Unique node identifier
    pub id: NodeId,

    /// Extent in model coordinates
    pub bbox: BoundingBox,

    /// Floors this node belongs to (never empty)
    floors: BTreeSet<FloorLevel>,

    /// Type tag, e.g. "classroom", "outdoor", "stairs"
    pub node_type: String,

    /// People currently inside
    pub current_occupancy: u32,

    /// Nominal capacity
    pub capacity: u32,

    /// Whether the node is currently non-hazardous
    pub safe: bool,

    /// Connector ids currently assigned for evacuating this node
    pub evacuation_path: Option<Vec<ConnectorId>>,
}

impl Node {
    /// Create a node, rejecting an empty floor set
    pub fn new(
        id: NodeId,
        bbox: BoundingBox,
        floors: impl IntoIterator<Item = FloorLevel>,
        node_type: impl Into<String>,
    ) -> Result<Self> {
        let floors: BTreeSet<FloorLevel> = floors.into_iter().collect();
        if floors.is_empty() {
            return Err(ModelError::EmptyFloorSet(id));
        }
        Ok(Self {
            id,
            bbox,
            floors,
            node_type: node_type.into(),
            current_occupancy: 0,
            capacity: 0,
            safe: true,
            evacuation_path: None,
        })
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_occupancy(mut self, occupancy: u32) -> Self {
        self.current_occupancy = occupancy;
        self
    }

    pub fn with_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn floors(&self) -> &BTreeSet<FloorLevel> {
        &self.floors
    }

    /// Replace the floor set, rejecting an empty one
    pub fn set_floors(&mut self, floors: impl IntoIterator<Item = FloorLevel>) -> Result<()> {
        let floors: BTreeSet<FloorLevel> = floors.into_iter().collect();
        if floors.is_empty() {
            return Err(ModelError::EmptyFloorSet(self.id));
        }
        self.floors = floors;
        Ok(())
    }

    pub fn is_on_floor(&self, floor: FloorLevel) -> bool {
        self.floors.contains(&floor)
    }

    /// Whether the node reaches more than one floor
    pub fn spans_floors(&self) -> bool {
        self.floors.len() >= 2
    }

    pub fn floors_intersect(&self, floors: &BTreeSet<FloorLevel>) -> bool {
        self.floors.iter().any(|f| floors.contains(f))
    }

    pub fn is_type(&self, node_type: &str) -> bool {
        self.node_type == node_type
    }
}

/// Serialized form of a node, named after the storage columns
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRecord {
    #[serde(rename = "node_id")]
    id: NodeId,
    #[serde(flatten)]
    bbox: BoundingBox,
    floor_level: Vec<FloorLevel>,
    node_type: String,
    #[serde(default)]
    current_occupancy: u32,
    #[serde(default)]
    capacity: u32,
    #[serde(default = "default_safe")]
    safe: bool,
    #[serde(default)]
    evacuation_path: Option<Vec<ConnectorId>>,
}

fn default_safe() -> bool {
    true
}

impl TryFrom<NodeRecord> for Node {
    type Error = ModelError;

    fn try_from(record: NodeRecord) -> Result<Self> {
        let mut node = Node::new(record.id, record.bbox, record.floor_level, record.node_type)?;
        node.current_occupancy = record.current_occupancy;
        node.capacity = record.capacity;
        node.safe = record.safe;
        node.evacuation_path = record.evacuation_path;
        Ok(node)
    }
}

impl From<Node> for NodeRecord {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            bbox: node.bbox,
            floor_level: node.floors.into_iter().collect(),
            node_type: node.node_type,
            current_occupancy: node.current_occupancy,
            capacity: node.capacity,
            safe: node.safe,
            evacuation_path: node.evacuation_path,
        }
    }
}
