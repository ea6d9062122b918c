//! Evacuation coordinator
//!
//! Turns a danger report into persisted routes:
//!
//! 1. resolve the hazard type (explicit, else a fresh current event, else drop)
//! 2. group the reported nodes by every floor they belong to
//! 3. route each node against its floor's exits, keeping the cheapest result
//!    when a node was routed from several floors
//! 4. persist each route and publish one routes-ready batch

use crate::error::CoordinatorResult;
use crate::transport::Transport;
use evac_graph::{GraphStore, PathCalculator, RouteOutcome};
use evac_rules::EventState;
use evac_types::{DangerReport, FloorLevel, NodeId, Route, RouteNotice, RoutesReady};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Summary of one processed report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub event_type: String,
    /// Set when a routes-ready signal was published
    pub batch_id: Option<Uuid>,
    /// Nodes whose route was persisted
    pub resolved: Vec<NodeId>,
    /// Nodes with no reachable exit
    pub unresolved: Vec<NodeId>,
    /// Nodes whose route could not be persisted
    pub failed: Vec<NodeId>,
    /// Node references that could not be resolved to a known node
    pub skipped: Vec<String>,
}

/// What happened to a report
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// No explicit event type and no fresh current event
    Dropped,
    Processed(BatchSummary),
}

#[derive(Debug, Default)]
struct AffectedNode {
    users: Vec<String>,
    best: Option<Route>,
}

/// Orchestrates route computation for danger reports
pub struct EvacuationCoordinator {
    store: Arc<GraphStore>,
    calculator: PathCalculator,
    event_state: Arc<EventState>,
    transport: Arc<dyn Transport>,
    routes_ready_queue: String,
    ttl: Duration,
}

impl EvacuationCoordinator {
    pub fn new(
        calculator: PathCalculator,
        event_state: Arc<EventState>,
        transport: Arc<dyn Transport>,
        routes_ready_queue: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store: calculator.store().clone(),
            calculator,
            event_state,
            transport,
            routes_ready_queue: routes_ready_queue.into(),
            ttl,
        }
    }

    pub fn calculator(&self) -> &PathCalculator {
        &self.calculator
    }

    /// Process one danger report
    #[instrument(skip(self, report), fields(nodes = report.dangerous_nodes.len()))]
    pub async fn handle(&self, report: &DangerReport) -> CoordinatorResult<ReportOutcome> {
        let Some(event_type) = self.resolve_event(report)? else {
            warn!("Dropping danger report: no event type and no fresh current event");
            return Ok(ReportOutcome::Dropped);
        };

        let mut summary = BatchSummary {
            event_type: event_type.clone(),
            ..Default::default()
        };

        let (groups, mut affected) = self.group_by_floor(report, &mut summary).await?;

        for (floor, nodes) in &groups {
            let exits = self
                .store
                .exit_nodes(*floor, &self.calculator.config().exit_node_types)
                .await?;
            debug!(floor, exits = exits.len(), sources = nodes.len(), "Routing floor group");

            for node_id in nodes {
                match self.calculator.route(*floor, *node_id, &exits).await? {
                    RouteOutcome::Found(route) => {
                        if let Some(entry) = affected.get_mut(node_id) {
                            let better = entry
                                .best
                                .as_ref()
                                .map_or(true, |best| route.total_secs < best.total_secs);
                            if better {
                                entry.best = Some(route);
                            }
                        }
                    }
                    RouteOutcome::NoRoute(reason) => {
                        debug!(floor, node_id = %node_id, %reason, "No route from floor");
                    }
                }
            }
        }

        let mut notices = Vec::new();
        for (node_id, entry) in affected {
            let Some(route) = entry.best else {
                warn!(node_id = %node_id, "No reachable exit; node left without a route");
                summary.unresolved.push(node_id);
                continue;
            };
            match self
                .store
                .set_evacuation_path(node_id, Some(route.connectors.clone()))
                .await
            {
                Ok(()) => {
                    summary.resolved.push(node_id);
                    notices.push(RouteNotice {
                        node_id,
                        user_ids: entry.users,
                        evacuation_path: route.connectors,
                    });
                }
                Err(e) => {
                    error!(node_id = %node_id, error = %e, "Failed to persist evacuation path");
                    summary.failed.push(node_id);
                }
            }
        }

        if !notices.is_empty() {
            let ready = RoutesReady::new(event_type.as_str(), notices);
            let payload = serde_json::to_vec(&ready)?;
            self.transport
                .publish(&self.routes_ready_queue, &payload)
                .await?;
            summary.batch_id = Some(ready.batch_id);
        }

        info!(
            event_type = %summary.event_type,
            resolved = summary.resolved.len(),
            unresolved = summary.unresolved.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "Danger report processed"
        );
        Ok(ReportOutcome::Processed(summary))
    }

    /// Explicit type wins and becomes current; otherwise fall back to a fresh
    /// current event
    fn resolve_event(&self, report: &DangerReport) -> CoordinatorResult<Option<String>> {
        if let Some(explicit) = report.explicit_event() {
            if self.event_state.get()?.as_deref() != Some(explicit) {
                info!(event_type = explicit, "Current event updated from danger report");
                self.event_state.set(explicit)?;
            }
            return Ok(Some(explicit.to_string()));
        }
        Ok(self.event_state.fresh(self.ttl)?)
    }

    async fn group_by_floor(
        &self,
        report: &DangerReport,
        summary: &mut BatchSummary,
    ) -> CoordinatorResult<(
        BTreeMap<FloorLevel, Vec<NodeId>>,
        BTreeMap<NodeId, AffectedNode>,
    )> {
        let mut groups: BTreeMap<FloorLevel, Vec<NodeId>> = BTreeMap::new();
        let mut affected: BTreeMap<NodeId, AffectedNode> = BTreeMap::new();

        for dangerous in &report.dangerous_nodes {
            let node_id = match dangerous.node_id.resolve() {
                Ok(id) => id,
                Err(e) => {
                    warn!(node = ?dangerous.node_id, error = %e, "Skipping unparseable node reference");
                    summary.skipped.push(format!("{:?}", dangerous.node_id));
                    continue;
                }
            };

            let Some(node) = self.store.node(node_id).await? else {
                warn!(node_id = %node_id, "Skipping unknown node");
                summary.skipped.push(node_id.to_string());
                continue;
            };

            let entry = affected.entry(node_id).or_insert_with(|| {
                for floor in node.floors() {
                    groups.entry(*floor).or_default().push(node_id);
                }
                AffectedNode::default()
            });
            for user in &dangerous.user_ids {
                if !entry.users.contains(user) {
                    entry.users.push(user.clone());
                }
            }
        }

        Ok((groups, affected))
    }
}

impl std::fmt::Debug for EvacuationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvacuationCoordinator")
            .field("routes_ready_queue", &self.routes_ready_queue)
            .field("ttl", &self.ttl)
            .finish()
    }
}
