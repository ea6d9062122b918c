//! Safety rule engine
//!
//! Turns a hazard alert into `safe` flags on the graph. Every rule resets a
//! baseline first, so applying the same rule twice yields the same flags.

use crate::error::RulesResult;
use crate::event_state::EventState;
use crate::rules::{DangerRule, RuleBook, RuleEntry, RuleScope};
use evac_graph::GraphStore;
use evac_types::{FloorLevel, HazardAlert, MsgType, NodeId, NODE_TYPE_OUTDOOR};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What the engine did with an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Cancellation: every node safe, current event cleared
    Cleared,
    /// Not an Alert/Update, or no event type; nothing changed
    Ignored,
    /// No rule for the event; all unsafe except outdoor nodes
    DefaultPolicy { event: String },
    /// The event's rule was applied
    Applied { event: String },
    /// The event's rule entry is invalid; flags untouched
    Rejected { event: String },
}

/// Applies danger rules to a graph store
#[derive(Debug, Clone)]
pub struct SafetyRuleEngine {
    rules: Arc<RuleBook>,
    event_state: Arc<EventState>,
}

impl SafetyRuleEngine {
    pub fn new(rules: Arc<RuleBook>, event_state: Arc<EventState>) -> Self {
        Self { rules, event_state }
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn event_state(&self) -> &Arc<EventState> {
        &self.event_state
    }

    /// Handle one inbound hazard alert
    #[instrument(skip(self, alert, store), fields(msg_type = ?alert.msg_type))]
    pub async fn handle_alert(
        &self,
        alert: &HazardAlert,
        store: &GraphStore,
    ) -> RulesResult<AlertOutcome> {
        match alert.msg_type {
            MsgType::Cancel => {
                let affected = store.set_safe_all(true).await?;
                self.event_state.clear()?;
                info!(affected, "Alert cancelled; all nodes safe");
                Ok(AlertOutcome::Cleared)
            }
            MsgType::Alert | MsgType::Update => match alert.event_type() {
                Some(event) => self.apply(event, store).await,
                None => {
                    warn!("Alert without info.event");
                    Ok(AlertOutcome::Ignored)
                }
            },
            MsgType::Unknown => {
                warn!("Ignoring alert with unsupported msgType");
                Ok(AlertOutcome::Ignored)
            }
        }
    }

    /// Record `event` as current and apply its rule
    #[instrument(skip(self, store))]
    pub async fn apply(&self, event: &str, store: &GraphStore) -> RulesResult<AlertOutcome> {
        self.event_state.set(event)?;

        match self.rules.get(event) {
            None => {
                warn!(event_type = event, "Unknown event; applying default policy");
                store.set_safe_all(false).await?;
                self.mark_type_safe(store, NODE_TYPE_OUTDOOR, None).await?;
                Ok(AlertOutcome::DefaultPolicy {
                    event: event.to_string(),
                })
            }
            Some(RuleEntry::Rejected(reason)) => {
                error!(event_type = event, %reason, "Invalid rule; safety flags unchanged");
                Ok(AlertOutcome::Rejected {
                    event: event.to_string(),
                })
            }
            Some(RuleEntry::Valid(rule)) => {
                self.apply_rule(rule, store).await?;
                Ok(AlertOutcome::Applied {
                    event: event.to_string(),
                })
            }
        }
    }

    async fn apply_rule(&self, rule: &DangerRule, store: &GraphStore) -> RulesResult<()> {
        let safe_type = rule.safe_node_type.as_deref();
        match &rule.scope {
            RuleScope::All => {
                store.set_safe_all(false).await?;
                if let Some(t) = safe_type {
                    self.mark_type_safe(store, t, None).await?;
                }
                info!(safe_node_type = ?safe_type, "All nodes unsafe");
            }
            RuleScope::FloorSet(floors) => {
                store.set_safe_all(true).await?;
                for floor in floors {
                    store.set_safe_for_floor(*floor, false).await?;
                }
                // must follow the floor sweep or it would be overwritten
                if let Some(t) = safe_type {
                    let danger: BTreeSet<FloorLevel> = floors.iter().copied().collect();
                    self.mark_type_safe(store, t, Some(&danger)).await?;
                }
                info!(?floors, safe_node_type = ?safe_type, "Danger floors unsafe");
            }
            RuleScope::Zone(zone) => {
                store.set_safe_all(true).await?;
                let hit: Vec<NodeId> = store
                    .nodes_in_zone(&zone.area(), zone.z1, zone.z2)
                    .await?
                    .into_iter()
                    .map(|n| n.id)
                    .collect();
                store.set_safe_for_nodes(&hit, false).await?;
                if let Some(t) = safe_type {
                    self.mark_type_safe(store, t, None).await?;
                }
                info!(
                    unsafe_nodes = hit.len(),
                    safe_node_type = ?safe_type,
                    "Danger zone unsafe"
                );
            }
        }
        Ok(())
    }

    /// Mark nodes of `node_type` safe, optionally only those touching `floors`
    async fn mark_type_safe(
        &self,
        store: &GraphStore,
        node_type: &str,
        floors: Option<&BTreeSet<FloorLevel>>,
    ) -> RulesResult<u64> {
        let ids: Vec<NodeId> = store
            .nodes_by_type(node_type)
            .await?
            .into_iter()
            .filter(|n| floors.map_or(true, |f| n.floors_intersect(f)))
            .map(|n| n.id)
            .collect();
        Ok(store.set_safe_for_nodes(&ids, true).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_state::ManualClock;
    use crate::rules::DangerZone;
    use evac_graph::{InMemoryMapStorage, MapSeed};
    use evac_types::{BoundingBox, Node, NODE_TYPE_STAIRS};
    use std::collections::BTreeMap;

    fn node(id: i64, floors: &[FloorLevel], node_type: &str, x: f64) -> Node {
        Node::new(
            NodeId(id),
            BoundingBox::flat(x, x + 4.0, 0.0, 4.0),
            floors.iter().copied(),
            node_type,
        )
        .unwrap()
    }

    /// 1: classroom@0, 2: stairs@{0,1}, 3: classroom@1, 4: outdoor@0, 5: stairs@{1,2}
    fn building() -> Arc<InMemoryMapStorage> {
        Arc::new(
            InMemoryMapStorage::from_seed(MapSeed {
                nodes: vec![
                    node(1, &[0], "classroom", 0.0),
                    node(2, &[0, 1], NODE_TYPE_STAIRS, 10.0),
                    node(3, &[1], "classroom", 20.0),
                    node(4, &[0], NODE_TYPE_OUTDOOR, 100.0),
                    node(5, &[1, 2], NODE_TYPE_STAIRS, 30.0),
                ],
                connectors: vec![],
            })
            .unwrap(),
        )
    }

    fn engine(book: RuleBook) -> SafetyRuleEngine {
        let state = Arc::new(EventState::new(Arc::new(ManualClock::new())));
        SafetyRuleEngine::new(Arc::new(book), state)
    }

    fn flood_book() -> RuleBook {
        let mut book = RuleBook::new();
        book.insert(
            "Flood",
            DangerRule {
                scope: RuleScope::FloorSet(vec![0]),
                safe_node_type: Some(NODE_TYPE_STAIRS.into()),
            },
        );
        book
    }

    async fn flags(storage: &InMemoryMapStorage) -> BTreeMap<i64, bool> {
        storage
            .all_nodes()
            .await
            .into_iter()
            .map(|n| (n.id.0, n.safe))
            .collect()
    }

    #[tokio::test]
    async fn test_flood_floor_rule_keeps_spanning_stairs_safe() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(flood_book());

        let outcome = engine.handle_alert(&HazardAlert::alert("Flood"), &store).await.unwrap();
        assert_eq!(outcome, AlertOutcome::Applied { event: "Flood".into() });

        let safe = flags(&storage).await;
        assert!(!safe[&1], "floor-0 classroom unsafe");
        assert!(safe[&2], "stairwell spanning 0 and 1 safe");
        assert!(safe[&3], "floor-1 classroom untouched");
        assert!(!safe[&4], "floor-0 outdoor unsafe");
        assert!(safe[&5], "stairwell off the danger floors stays safe");
        assert_eq!(engine.event_state().get().unwrap().as_deref(), Some("Flood"));
    }

    #[tokio::test]
    async fn test_all_scope_with_override() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let mut book = RuleBook::new();
        book.insert(
            "Fire",
            DangerRule {
                scope: RuleScope::All,
                safe_node_type: Some(NODE_TYPE_OUTDOOR.into()),
            },
        );
        let engine = engine(book);

        engine.handle_alert(&HazardAlert::alert("Fire"), &store).await.unwrap();
        let safe = flags(&storage).await;
        assert_eq!(safe.values().filter(|s| **s).count(), 1);
        assert!(safe[&4]);
    }

    #[tokio::test]
    async fn test_zone_scope_uses_centroid_and_floor_range() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let mut book = RuleBook::new();
        book.insert(
            "GasLeak",
            DangerRule {
                scope: RuleScope::Zone(DangerZone {
                    x1: 0.0,
                    x2: 25.0,
                    y1: 0.0,
                    y2: 10.0,
                    z1: 1,
                    z2: 1,
                }),
                safe_node_type: None,
            },
        );
        let engine = engine(book);

        engine.handle_alert(&HazardAlert::alert("GasLeak"), &store).await.unwrap();
        let safe = flags(&storage).await;
        assert!(safe[&1], "inside the rectangle but not on floor 1");
        assert!(!safe[&2]);
        assert!(!safe[&3]);
        assert!(safe[&5], "on floor 1 but centroid outside");
    }

    #[tokio::test]
    async fn test_unknown_event_gets_default_policy() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(RuleBook::new());

        let outcome = engine.handle_alert(&HazardAlert::alert("Tsunami"), &store).await.unwrap();
        assert_eq!(outcome, AlertOutcome::DefaultPolicy { event: "Tsunami".into() });
        let safe = flags(&storage).await;
        assert!(safe[&4]);
        assert!(!safe[&1] && !safe[&2] && !safe[&3] && !safe[&5]);
    }

    #[tokio::test]
    async fn test_reapplying_rule_is_idempotent() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(flood_book());

        engine.handle_alert(&HazardAlert::alert("Flood"), &store).await.unwrap();
        let once = flags(&storage).await;
        engine
            .handle_alert(&HazardAlert::with_type(MsgType::Update, Some("Flood".into())), &store)
            .await
            .unwrap();
        assert_eq!(flags(&storage).await, once);
    }

    #[tokio::test]
    async fn test_cancel_restores_everything() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(RuleBook::new());

        engine.handle_alert(&HazardAlert::alert("Tsunami"), &store).await.unwrap();
        let outcome = engine.handle_alert(&HazardAlert::cancel(), &store).await.unwrap();
        assert_eq!(outcome, AlertOutcome::Cleared);
        assert!(flags(&storage).await.values().all(|s| *s));
        assert_eq!(engine.event_state().get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_ignored_messages_change_nothing() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(RuleBook::new());

        let no_event = HazardAlert::with_type(MsgType::Alert, None);
        assert_eq!(engine.handle_alert(&no_event, &store).await.unwrap(), AlertOutcome::Ignored);
        let ack = HazardAlert::with_type(MsgType::Unknown, Some("Fire".into()));
        assert_eq!(engine.handle_alert(&ack, &store).await.unwrap(), AlertOutcome::Ignored);

        assert!(flags(&storage).await.values().all(|s| *s));
        assert_eq!(engine.event_state().get().unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejected_rule_mutates_nothing() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let book = RuleBook::from_yaml_str("emergencies:\n  Meteor:\n    type: crater\n").unwrap();
        let engine = engine(book);

        let outcome = engine.handle_alert(&HazardAlert::alert("Meteor"), &store).await.unwrap();
        assert_eq!(outcome, AlertOutcome::Rejected { event: "Meteor".into() });
        assert!(flags(&storage).await.values().all(|s| *s));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let storage = building();
        let store = GraphStore::new(storage.clone());
        let engine = engine(flood_book());

        storage.fail_writes(true).await;
        let err = engine
            .handle_alert(&HazardAlert::alert("Flood"), &store)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
