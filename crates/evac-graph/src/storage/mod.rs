//! Storage layer for evac-graph
//!
//! Persistent storage for nodes, connectors and the connector audit trail.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod traits;

pub use memory::{InMemoryMapStorage, MapSeed};
#[cfg(feature = "postgres")]
pub use postgres::PostgresMapStorage;
pub use traits::{ConnectorStorage, MapStorage, NodeStorage};
