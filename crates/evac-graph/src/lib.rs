//! Evac Graph - floor graphs, storage and route computation
//!
//! - [`GraphStore`] caches one [`FloorGraph`] per floor, loaded on demand
//!   from a [`MapStorage`] backend, and applies safety, activity and
//!   occupancy changes to storage and cache alike.
//! - [`PathCalculator`] answers "how does this node get out" against the
//!   current state, stitching in floors reachable through stairwells.
//!
//! The `postgres` feature enables [`storage::PostgresMapStorage`]. The
//! `test-utils` feature exposes fault injection on
//! [`InMemoryMapStorage`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod graph;
pub mod path;
pub mod storage;
pub mod store;

pub use error::{GraphError, GraphResult, StorageError, StorageResult};
pub use graph::FloorGraph;
pub use path::{plan_route, NoRouteReason, PathCalculator, PathfindingConfig, RouteOutcome};
pub use storage::{ConnectorStorage, InMemoryMapStorage, MapSeed, MapStorage, NodeStorage};
pub use store::{GraphStore, NodeInsert, DEFAULT_DEDUP_TOLERANCE};
