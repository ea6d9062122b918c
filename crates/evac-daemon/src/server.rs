//! Server setup and lifecycle management

use crate::config::{DaemonConfig, StorageConfig};
use crate::coordinator::EvacuationCoordinator;
use crate::error::{DaemonError, DaemonResult};
use crate::transport::Transport;
use crate::workers::{run_consumer, AlertHandler, MessageHandler, RelayHandler, ReportHandler};
use evac_graph::{GraphStore, InMemoryMapStorage, MapStorage, PathCalculator};
use evac_rules::{EventState, RuleBook, SafetyRuleEngine};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Evac daemon server
pub struct Server {
    config: DaemonConfig,
    transport: Arc<dyn Transport>,
    store: Arc<GraphStore>,
    engine: Arc<SafetyRuleEngine>,
    coordinator: Arc<EvacuationCoordinator>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    /// Create a new server with the given configuration and transport
    pub async fn new(config: DaemonConfig, transport: Arc<dyn Transport>) -> DaemonResult<Self> {
        let storage = open_storage(&config.storage).await?;
        let store = Arc::new(GraphStore::with_tolerance(
            storage,
            config.graph.dedup_tolerance,
        ));

        let rules = Arc::new(RuleBook::load_or_default(&config.rules.path));
        let event_state = Arc::new(EventState::default());
        let engine = Arc::new(SafetyRuleEngine::new(rules, event_state.clone()));

        let calculator = PathCalculator::new(store.clone(), config.pathfinding.clone());
        let coordinator = Arc::new(EvacuationCoordinator::new(
            calculator,
            event_state,
            transport.clone(),
            config.queues.routes_ready.clone(),
            config.event_state.ttl(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            transport,
            store,
            engine,
            coordinator,
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SafetyRuleEngine> {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<EvacuationCoordinator> {
        &self.coordinator
    }

    /// Spawn one consumer per inbound queue
    pub fn spawn_workers(&self) -> Vec<(String, JoinHandle<()>)> {
        let queues = &self.config.queues;
        let workers: Vec<(String, Arc<dyn MessageHandler>)> = vec![
            (
                queues.alerts.clone(),
                Arc::new(AlertHandler::new(self.engine.clone(), self.store.clone()))
                    as Arc<dyn MessageHandler>,
            ),
            (
                queues.danger_reports.clone(),
                Arc::new(ReportHandler::new(self.coordinator.clone())) as Arc<dyn MessageHandler>,
            ),
            (
                queues.routes_ready.clone(),
                Arc::new(RelayHandler::new(
                    self.transport.clone(),
                    queues.alerted_users.clone(),
                )) as Arc<dyn MessageHandler>,
            ),
        ];

        workers
            .into_iter()
            .map(|(queue, handler)| {
                let name = handler.name().to_string();
                let handle = tokio::spawn(run_consumer(
                    self.transport.clone(),
                    queue,
                    handler,
                    self.shutdown_tx.subscribe(),
                ));
                (name, handle)
            })
            .collect()
    }

    /// Ask every consumer to stop after its current message
    pub fn shutdown(&self) {
        // no receivers yet is fine
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let workers = self.spawn_workers();
        tracing::info!(workers = workers.len(), "Evac daemon running");

        shutdown_signal().await;
        tracing::info!("Evac daemon shutting down");
        self.shutdown();

        join_workers(workers).await
    }
}

async fn join_workers(workers: Vec<(String, JoinHandle<()>)>) -> DaemonResult<()> {
    let mut failed = None;
    for (name, handle) in workers {
        if let Err(e) = handle.await {
            tracing::error!(worker = %name, error = %e, "Worker task failed");
            failed.get_or_insert(name);
        }
    }
    match failed {
        Some(name) => Err(DaemonError::Worker(name)),
        None => Ok(()),
    }
}

async fn open_storage(config: &StorageConfig) -> DaemonResult<Arc<dyn MapStorage>> {
    match config {
        StorageConfig::Memory { seed: Some(path) } => {
            let storage = InMemoryMapStorage::from_seed_file(path).await?;
            tracing::info!(seed = %path.display(), "Using in-memory storage");
            Ok(Arc::new(storage))
        }
        StorageConfig::Memory { seed: None } => {
            tracing::warn!("Using empty in-memory storage");
            Ok(Arc::new(InMemoryMapStorage::new()))
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let storage = evac_graph::storage::PostgresMapStorage::new(
                url,
                *max_connections,
                *connect_timeout_secs,
            )
            .await?;
            tracing::info!("Using PostgreSQL storage");
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => Err(DaemonError::Config(
            "PostgreSQL storage requires the `postgres` feature".to_string(),
        )),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;

    #[tokio::test]
    async fn test_workers_stop_on_shutdown() {
        let transport = Arc::new(InMemoryTransport::new());
        let server = Server::new(DaemonConfig::default(), transport).await.unwrap();

        let workers = server.spawn_workers();
        assert_eq!(workers.len(), 3);
        server.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(2), join_workers(workers))
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_postgres_without_feature_is_config_error() {
        let config = StorageConfig::Postgres {
            url: "postgres://localhost/evac".into(),
            max_connections: 1,
            connect_timeout_secs: 1,
        };
        assert!(matches!(
            open_storage(&config).await,
            Err(DaemonError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_seed_file_fails_startup() {
        let config = StorageConfig::Memory {
            seed: Some("/nonexistent/map.json".into()),
        };
        assert!(open_storage(&config).await.is_err());
    }
}
