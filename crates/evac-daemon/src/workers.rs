//! Queue consumers
//!
//! One task per inbound queue runs a receive-process-acknowledge loop.
//! Successful and permanently failing messages are acked; transient
//! failures are nacked and requeued.

use crate::coordinator::EvacuationCoordinator;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::transport::{Delivery, Transport};
use async_trait::async_trait;
use evac_graph::GraphStore;
use evac_rules::SafetyRuleEngine;
use evac_types::{DangerReport, HazardAlert, RoutesReady, UserRouteNotice};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Processes the payload of one delivery
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &[u8]) -> CoordinatorResult<()>;
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> CoordinatorResult<T> {
    serde_json::from_slice(payload).map_err(|e| CoordinatorError::Malformed(e.to_string()))
}

/// Hazard alerts into safety flags
pub struct AlertHandler {
    engine: Arc<SafetyRuleEngine>,
    store: Arc<GraphStore>,
}

impl AlertHandler {
    pub fn new(engine: Arc<SafetyRuleEngine>, store: Arc<GraphStore>) -> Self {
        Self { engine, store }
    }
}

#[async_trait]
impl MessageHandler for AlertHandler {
    fn name(&self) -> &'static str {
        "alerts"
    }

    async fn handle(&self, payload: &[u8]) -> CoordinatorResult<()> {
        let alert: HazardAlert = decode(payload)?;
        let outcome = self.engine.handle_alert(&alert, &self.store).await?;
        debug!(?outcome, "Alert handled");
        Ok(())
    }
}

/// Danger reports into routes
pub struct ReportHandler {
    coordinator: Arc<EvacuationCoordinator>,
}

impl ReportHandler {
    pub fn new(coordinator: Arc<EvacuationCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl MessageHandler for ReportHandler {
    fn name(&self) -> &'static str {
        "danger-reports"
    }

    async fn handle(&self, payload: &[u8]) -> CoordinatorResult<()> {
        let report: DangerReport = decode(payload)?;
        self.coordinator.handle(&report).await?;
        Ok(())
    }
}

/// Routes-ready batches into one notice per affected user
pub struct RelayHandler {
    transport: Arc<dyn Transport>,
    alerted_users_queue: String,
}

impl RelayHandler {
    pub fn new(transport: Arc<dyn Transport>, alerted_users_queue: impl Into<String>) -> Self {
        Self {
            transport,
            alerted_users_queue: alerted_users_queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for RelayHandler {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn handle(&self, payload: &[u8]) -> CoordinatorResult<()> {
        let ready: RoutesReady = decode(payload)?;
        if ready.msg_type != RoutesReady::MSG_TYPE {
            warn!(msg_type = %ready.msg_type, "Ignoring non routes-ready message");
            return Ok(());
        }

        let mut sent = 0usize;
        for route in &ready.routes {
            for user in &route.user_ids {
                let notice =
                    UserRouteNotice::new(user.as_str(), route.node_id, route.evacuation_path.clone());
                self.transport
                    .publish(&self.alerted_users_queue, &serde_json::to_vec(&notice)?)
                    .await?;
                sent += 1;
            }
        }
        info!(batch_id = %ready.batch_id, notices = sent, "Relayed evacuation notices");
        Ok(())
    }
}

/// Consume `queue` until shutdown is signalled or the transport closes
pub async fn run_consumer(
    transport: Arc<dyn Transport>,
    queue: String,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker = handler.name(), %queue, "Consumer started");

    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            received = transport.receive(&queue) => match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(e) => {
                    error!(worker = handler.name(), error = %e, "Receive failed");
                    break;
                }
            },
        };

        process(transport.as_ref(), handler.as_ref(), &delivery).await;

        if *shutdown.borrow() {
            break;
        }
    }

    info!(worker = handler.name(), %queue, "Consumer stopped");
}

async fn process(transport: &dyn Transport, handler: &dyn MessageHandler, delivery: &Delivery) {
    let settled = match handler.handle(&delivery.payload).await {
        Ok(()) => transport.ack(delivery).await,
        Err(e) if e.is_transient() => {
            warn!(
                worker = handler.name(),
                tag = delivery.tag,
                error = %e,
                "Transient failure; requeueing"
            );
            transport.nack(delivery, true).await
        }
        Err(e) => {
            error!(
                worker = handler.name(),
                tag = delivery.tag,
                error = %e,
                "Dropping message"
            );
            transport.ack(delivery).await
        }
    };

    if let Err(e) = settled {
        error!(worker = handler.name(), tag = delivery.tag, error = %e, "Failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use evac_types::{ConnectorId, NodeId, RouteNotice};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails transiently on the first call, then succeeds
    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, payload: &[u8]) -> CoordinatorResult<()> {
            let _: serde_json::Value = decode(payload)?;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(crate::error::TransportError::PublishFailed {
                    queue: "downstream".into(),
                    reason: "unavailable".into(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_malformed_is_acked_and_transient_is_requeued() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });

        transport.publish("q", b"{not json").await.unwrap();
        transport.publish("q", br#"{"ok":true}"#).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_consumer(
            transport.clone(),
            "q".to_string(),
            handler.clone(),
            rx,
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.calls.load(Ordering::SeqCst) < 2 || transport.unacked_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        worker.await.unwrap();

        // malformed message never reached the counter; valid one ran twice
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.depth("q").await, 0);
    }

    #[tokio::test]
    async fn test_relay_fans_out_per_user() {
        let transport = Arc::new(InMemoryTransport::new());
        let relay = RelayHandler::new(transport.clone(), "users");

        let ready = RoutesReady::new(
            "Fire",
            vec![
                RouteNotice {
                    node_id: NodeId(1),
                    user_ids: vec!["a".into(), "b".into()],
                    evacuation_path: vec![ConnectorId(3)],
                },
                RouteNotice {
                    node_id: NodeId(2),
                    user_ids: vec!["c".into()],
                    evacuation_path: vec![],
                },
            ],
        );
        relay.handle(&serde_json::to_vec(&ready).unwrap()).await.unwrap();

        let notices: Vec<UserRouteNotice> = transport
            .drain("users")
            .await
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect();
        assert_eq!(notices.len(), 3);
        assert_eq!(notices[0].msg_type, UserRouteNotice::MSG_TYPE);
        assert_eq!(notices[1].user_id, "b");
        assert_eq!(notices[1].evacuation_path, vec![ConnectorId(3)]);
        assert_eq!(notices[2].node_id, NodeId(2));
    }

    #[tokio::test]
    async fn test_relay_ignores_other_message_types() {
        let transport = Arc::new(InMemoryTransport::new());
        let relay = RelayHandler::new(transport.clone(), "users");

        let mut ready = RoutesReady::new("Fire", vec![]);
        ready.msg_type = "stop".into();
        relay.handle(&serde_json::to_vec(&ready).unwrap()).await.unwrap();
        assert_eq!(transport.depth("users").await, 0);
    }

    #[tokio::test]
    async fn test_consumer_stops_when_transport_closes() {
        let transport = Arc::new(InMemoryTransport::new());
        let (_tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_consumer(
            transport.clone(),
            "q".to_string(),
            Arc::new(Flaky {
                calls: AtomicUsize::new(0),
            }),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
