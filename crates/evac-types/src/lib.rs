//! Evac Types - Building model and message records
//!
//! Evac computes evacuation routes through a multi-floor building graph and
//! keeps them current as hazard alerts and danger reports arrive. This crate
//! holds the shared vocabulary every other crate speaks.
//!
//! ## Key Concepts
//!
//! - **Node**: A location in the building (room, corridor, stairwell, outdoor exit)
//! - **Connector**: An undirected passage between two nodes with a traversal cost
//! - **Route**: Ordered connector ids leading from a node to an exit
//! - **Messages**: Hazard alerts in, danger reports in, route notices out
//!
//! Records validate their invariants at construction time: a node always has
//! at least one floor, a connector always joins two distinct nodes with a
//! positive traversal time.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod connector;
pub mod error;
pub mod ids;
pub mod messages;
pub mod node;
pub mod route;

// Re-export main types
pub use connector::{Connector, ConnectorAudit};
pub use error::{ModelError, Result};
pub use ids::{ConnectorId, FloorLevel, NodeId};
pub use messages::{
    AlertInfo, DangerReport, DangerousNode, HazardAlert, MsgType, NodeRef, RouteNotice, RoutesReady,
    UserRouteNotice,
};
pub use node::{BoundingBox, Node, NODE_TYPE_OUTDOOR, NODE_TYPE_STAIRS};
pub use route::Route;
