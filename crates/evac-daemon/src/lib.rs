//! Evac Daemon library
//!
//! This module provides the core components for the evac daemon:
//! - Configuration loading
//! - Message transport boundary and an in-process transport
//! - Evacuation coordinator for danger reports
//! - Queue consumers and server lifecycle management

pub mod config;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod transport;
pub mod workers;

pub use config::DaemonConfig;
pub use coordinator::{BatchSummary, EvacuationCoordinator, ReportOutcome};
pub use error::{CoordinatorError, DaemonError, DaemonResult, TransportError};
pub use server::Server;
pub use transport::{Delivery, InMemoryTransport, Transport};
pub use workers::{run_consumer, AlertHandler, MessageHandler, RelayHandler, ReportHandler};
