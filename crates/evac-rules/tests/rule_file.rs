//! Rule file loading and application against a seeded building

use evac_graph::{GraphStore, InMemoryMapStorage, MapSeed};
use evac_rules::{AlertOutcome, EventState, ManualClock, RuleBook, RuleEntry, SafetyRuleEngine};
use evac_types::{BoundingBox, FloorLevel, HazardAlert, Node, NodeId};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

// ============================================================================
// Helpers
// ============================================================================

const ALERTS_YAML: &str = r#"
emergencies:
  Fire:
    type: all
    safe_node_type: outdoor
  Flood:
    type: floor
    danger_floors: [0]
    safe_node_type: stairs
  ChemicalSpill:
    type: zone
    danger_zone: { x1: 0, x2: 15, y1: 0, y2: 10, z1: 0, z2: 0 }
    safe_node_type: stairs
  Earthquake:
    type: tremor
"#;

fn write_rules(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn node(id: i64, floors: &[FloorLevel], node_type: &str) -> Node {
    let x = id as f64 * 5.0;
    Node::new(
        NodeId(id),
        BoundingBox::flat(x, x + 4.0, 0.0, 4.0),
        floors.iter().copied(),
        node_type,
    )
    .unwrap()
}

fn school() -> Arc<InMemoryMapStorage> {
    Arc::new(
        InMemoryMapStorage::from_seed(MapSeed {
            nodes: vec![
                node(1, &[0], "classroom"),
                node(2, &[0, 1], "stairs"),
                node(3, &[1], "classroom"),
                node(4, &[0], "outdoor"),
                node(5, &[1], "corridor"),
            ],
            connectors: vec![],
        })
        .unwrap(),
    )
}

async fn safe_map(storage: &InMemoryMapStorage) -> BTreeMap<i64, bool> {
    storage
        .all_nodes()
        .await
        .into_iter()
        .map(|n| (n.id.0, n.safe))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_rules_loaded_from_file_drive_flags() {
    let file = write_rules(ALERTS_YAML);
    let book = RuleBook::load(file.path()).unwrap();
    assert_eq!(book.len(), 4);
    assert!(matches!(book.get("Earthquake"), Some(RuleEntry::Rejected(_))));

    let storage = school();
    let store = GraphStore::new(storage.clone());
    let engine = SafetyRuleEngine::new(
        Arc::new(book),
        Arc::new(EventState::new(Arc::new(ManualClock::new()))),
    );

    engine.handle_alert(&HazardAlert::alert("Fire"), &store).await.unwrap();
    let after_fire = safe_map(&storage).await;
    assert_eq!(
        after_fire,
        BTreeMap::from([(1, false), (2, false), (3, false), (4, true), (5, false)])
    );

    // zone covers centroids of 1 (7.0) and 2 (12.0) on floor 0 only
    engine
        .handle_alert(&HazardAlert::alert("ChemicalSpill"), &store)
        .await
        .unwrap();
    assert_eq!(
        safe_map(&storage).await,
        BTreeMap::from([(1, false), (2, true), (3, true), (4, true), (5, true)])
    );

    let outcome = engine
        .handle_alert(&HazardAlert::alert("Earthquake"), &store)
        .await
        .unwrap();
    assert_eq!(outcome, AlertOutcome::Rejected { event: "Earthquake".into() });
    assert_eq!(engine.event_state().get().unwrap().as_deref(), Some("Earthquake"));

    engine.handle_alert(&HazardAlert::cancel(), &store).await.unwrap();
    assert!(safe_map(&storage).await.values().all(|s| *s));
}

#[tokio::test]
async fn test_cached_graph_follows_rule_application() {
    let file = write_rules(ALERTS_YAML);
    let storage = school();
    let store = GraphStore::new(storage.clone());
    let engine = SafetyRuleEngine::new(
        Arc::new(RuleBook::load(file.path()).unwrap()),
        Arc::new(EventState::default()),
    );

    // warm the floor-0 cache before the alert lands
    let before = store.get(0).await.unwrap();
    assert!(before.nodes().all(|n| n.safe));

    engine.handle_alert(&HazardAlert::alert("Flood"), &store).await.unwrap();
    let after = store.get(0).await.unwrap();
    assert!(!after.node(NodeId(1)).unwrap().safe);
    assert!(after.node(NodeId(2)).unwrap().safe);
    assert!(!after.node(NodeId(4)).unwrap().safe);
}

#[test]
fn test_unreadable_rule_file_yields_empty_book() {
    let file = write_rules("emergencies: [unterminated");
    assert!(RuleBook::load(file.path()).is_err());
    assert!(RuleBook::load_or_default(file.path()).is_empty());
}
