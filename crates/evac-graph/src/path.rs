//! Route computation
//!
//! [`PathCalculator::route`] builds a working graph for one request: the
//! source floor, plus every other floor reachable through a multi-floor
//! connector node (one level deep). Inactive connectors and full nodes are
//! filtered out, then a single-source Dijkstra picks the cheapest exit.

use crate::error::GraphResult;
use crate::graph::FloorGraph;
use crate::store::GraphStore;
use evac_types::{ConnectorId, FloorLevel, NodeId, Route, NODE_TYPE_OUTDOOR, NODE_TYPE_STAIRS};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pathfinding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathfindingConfig {
    /// Node types that terminate a route
    pub exit_node_types: Vec<String>,

    /// Node types that stitch floors together
    pub connector_node_types: Vec<String>,

    /// Nodes at or above this occupancy are not routed through
    pub max_node_capacity: u32,

    /// Flow ceiling for connectors without a recorded capacity
    pub max_arc_capacity: u32,

    /// Also drop unsafe non-exit nodes (other than the source)
    pub avoid_unsafe_nodes: bool,
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        Self {
            exit_node_types: vec![NODE_TYPE_OUTDOOR.to_string(), NODE_TYPE_STAIRS.to_string()],
            connector_node_types: vec![NODE_TYPE_STAIRS.to_string()],
            max_node_capacity: 50,
            max_arc_capacity: 30,
            avoid_unsafe_nodes: false,
        }
    }
}

/// Why no route was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRouteReason {
    /// The source node is not on the requested floor
    SourceNotFound,
    /// None of the candidate exits survived filtering
    NoExitPresent,
    /// No candidate exit is reachable from the source
    Unreachable,
}

impl std::fmt::Display for NoRouteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NoRouteReason::SourceNotFound => "source not found",
            NoRouteReason::NoExitPresent => "no exit present",
            NoRouteReason::Unreachable => "no exit reachable",
        };
        f.write_str(text)
    }
}

/// Result of a route request
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Found(Route),
    NoRoute(NoRouteReason),
}

impl RouteOutcome {
    pub fn route(&self) -> Option<&Route> {
        match self {
            RouteOutcome::Found(route) => Some(route),
            RouteOutcome::NoRoute(_) => None,
        }
    }

    pub fn into_route(self) -> Option<Route> {
        match self {
            RouteOutcome::Found(route) => Some(route),
            RouteOutcome::NoRoute(_) => None,
        }
    }
}

/// Priority queue entry; ordered so `BinaryHeap` pops the cheapest first
#[derive(Debug, Clone, Copy)]
struct Frontier {
    cost: f64,
    node: NodeId,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for min-heap; lower id wins on equal cost
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Shortest distances and predecessors from `source` over `graph`
fn dijkstra(
    graph: &FloorGraph,
    source: NodeId,
) -> (BTreeMap<NodeId, f64>, BTreeMap<NodeId, NodeId>) {
    let mut dist: BTreeMap<NodeId, f64> = BTreeMap::new();
    let mut prev: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(source, 0.0);
    heap.push(Frontier {
        cost: 0.0,
        node: source,
    });

    while let Some(Frontier { cost, node }) = heap.pop() {
        if dist.get(&node).is_some_and(|&best| cost > best) {
            continue;
        }
        for (connector, next) in graph.neighbors(node) {
            let candidate = cost + connector.traversal_time;
            let improves = dist.get(&next).map_or(true, |&known| candidate < known);
            if improves {
                dist.insert(next, candidate);
                prev.insert(next, node);
                heap.push(Frontier {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }

    (dist, prev)
}

/// Pick the cheapest reachable exit in an already-filtered working graph.
///
/// Equal totals go to the lowest exit id. A source that is itself a
/// candidate exit yields an empty route.
pub fn plan_route(
    graph: &FloorGraph,
    source: NodeId,
    exits: &[NodeId],
) -> Result<Route, NoRouteReason> {
    if !graph.contains_node(source) {
        return Err(NoRouteReason::SourceNotFound);
    }
    let candidates: BTreeSet<NodeId> = exits
        .iter()
        .copied()
        .filter(|id| graph.contains_node(*id))
        .collect();
    if candidates.is_empty() {
        return Err(NoRouteReason::NoExitPresent);
    }
    if candidates.contains(&source) {
        return Ok(Route::trivial(source));
    }

    let (dist, prev) = dijkstra(graph, source);

    let mut best: Option<(NodeId, f64)> = None;
    for exit in &candidates {
        if let Some(&total) = dist.get(exit) {
            if best.map_or(true, |(_, b)| total < b) {
                best = Some((*exit, total));
            }
        }
    }
    let (exit, total_secs) = best.ok_or(NoRouteReason::Unreachable)?;

    let mut nodes = vec![exit];
    let mut cursor = exit;
    while let Some(&p) = prev.get(&cursor) {
        nodes.push(p);
        cursor = p;
    }
    nodes.reverse();

    let mut connectors: Vec<ConnectorId> = Vec::with_capacity(nodes.len().saturating_sub(1));
    for pair in nodes.windows(2) {
        match graph
            .connector_between(pair[0], pair[1])
            .or_else(|| graph.connector_between(pair[1], pair[0]))
        {
            Some(connector) => connectors.push(connector.id),
            None => warn!(from = %pair[0], to = %pair[1], "No connector between consecutive route nodes"),
        }
    }

    Ok(Route {
        source,
        exit,
        connectors,
        total_secs,
    })
}

/// Computes evacuation routes against the current graph state
#[derive(Debug, Clone)]
pub struct PathCalculator {
    store: Arc<GraphStore>,
    config: PathfindingConfig,
}

impl PathCalculator {
    pub fn new(store: Arc<GraphStore>, config: PathfindingConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PathfindingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Source floor merged with the floors its connector nodes reach,
    /// before any filtering. `None` if the source is not on `floor`.
    pub async fn stitched_graph(
        &self,
        floor: FloorLevel,
        source: NodeId,
    ) -> GraphResult<Option<FloorGraph>> {
        let base = self.store.get(floor).await?;
        if !base.contains_node(source) {
            return Ok(None);
        }

        let mut other_floors = BTreeSet::new();
        for node in base.nodes() {
            let is_connector = self
                .config
                .connector_node_types
                .iter()
                .any(|t| node.is_type(t));
            if is_connector && node.spans_floors() {
                other_floors.extend(node.floors().iter().copied().filter(|f| *f != floor));
            }
        }

        let mut working = FloorGraph::clone(&base);
        for other in other_floors {
            let graph = self.store.get(other).await?;
            working.merge(&graph);
        }
        Ok(Some(working))
    }

    /// Shortest available route from `source` on `floor` to any of `exits`
    pub async fn route(
        &self,
        floor: FloorLevel,
        source: NodeId,
        exits: &[NodeId],
    ) -> GraphResult<RouteOutcome> {
        let Some(mut working) = self.stitched_graph(floor, source).await? else {
            debug!(floor, node_id = %source, "Route source not on floor");
            return Ok(RouteOutcome::NoRoute(NoRouteReason::SourceNotFound));
        };

        working.retain_connectors(|c| c.active);
        let ceiling = self.config.max_node_capacity;
        working.retain_nodes(|n| n.id == source || n.current_occupancy < ceiling);
        if self.config.avoid_unsafe_nodes {
            let exit_set: BTreeSet<NodeId> = exits.iter().copied().collect();
            working.retain_nodes(|n| n.id == source || n.safe || exit_set.contains(&n.id));
        }

        match plan_route(&working, source, exits) {
            Ok(route) => {
                debug!(
                    floor,
                    node_id = %source,
                    exit = %route.exit,
                    hops = route.hops(),
                    total_secs = route.total_secs,
                    "Route computed"
                );
                Ok(RouteOutcome::Found(route))
            }
            Err(reason) => {
                debug!(floor, node_id = %source, %reason, "No route");
                Ok(RouteOutcome::NoRoute(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryMapStorage, MapSeed};
    use evac_types::{BoundingBox, Connector, Node};

    fn node(id: i64, floors: &[FloorLevel], node_type: &str) -> Node {
        let x = id as f64 * 10.0;
        Node::new(
            NodeId(id),
            BoundingBox::flat(x, x + 5.0, 0.0, 5.0),
            floors.iter().copied(),
            node_type,
        )
        .unwrap()
    }

    fn conn(id: i64, a: i64, b: i64, secs: f64) -> Connector {
        Connector::new(ConnectorId(id), NodeId(a), NodeId(b), secs).unwrap()
    }

    fn calculator(seed: MapSeed, config: PathfindingConfig) -> PathCalculator {
        let storage = Arc::new(InMemoryMapStorage::from_seed(seed).unwrap());
        PathCalculator::new(Arc::new(GraphStore::new(storage)), config)
    }

    /// 1 -- 2 -- 3(outdoor), with a slower detour 1 -- 4 -- 3
    fn corridor() -> MapSeed {
        MapSeed {
            nodes: vec![
                node(1, &[0], "classroom"),
                node(2, &[0], "corridor"),
                node(3, &[0], "outdoor"),
                node(4, &[0], "corridor"),
            ],
            connectors: vec![
                conn(10, 1, 2, 2.0),
                conn(11, 3, 2, 2.0),
                conn(12, 1, 4, 3.0),
                conn(13, 4, 3, 3.0),
            ],
        }
    }

    #[test]
    fn test_plan_route_ties_go_to_lowest_exit() {
        let graph = FloorGraph::from_parts(
            0,
            vec![node(1, &[0], "room"), node(7, &[0], "outdoor"), node(5, &[0], "outdoor")],
            vec![conn(10, 1, 7, 4.0), conn(11, 1, 5, 4.0)],
        )
        .unwrap();
        let route = plan_route(&graph, NodeId(1), &[NodeId(7), NodeId(5)]).unwrap();
        assert_eq!(route.exit, NodeId(5));
        assert_eq!(route.connectors, vec![ConnectorId(11)]);
    }

    #[test]
    fn test_plan_route_source_is_exit() {
        let graph = FloorGraph::from_parts(0, vec![node(3, &[0], "outdoor")], vec![]).unwrap();
        let route = plan_route(&graph, NodeId(3), &[NodeId(3)]).unwrap();
        assert!(route.is_empty());
        assert_eq!(route.total_secs, 0.0);
    }

    #[test]
    fn test_plan_route_reasons() {
        let graph = FloorGraph::from_parts(
            0,
            vec![node(1, &[0], "room"), node(2, &[0], "outdoor")],
            vec![],
        )
        .unwrap();
        assert_eq!(
            plan_route(&graph, NodeId(9), &[NodeId(2)]),
            Err(NoRouteReason::SourceNotFound)
        );
        assert_eq!(
            plan_route(&graph, NodeId(1), &[NodeId(8)]),
            Err(NoRouteReason::NoExitPresent)
        );
        assert_eq!(
            plan_route(&graph, NodeId(1), &[NodeId(2)]),
            Err(NoRouteReason::Unreachable)
        );
    }

    #[tokio::test]
    async fn test_shortest_route_walks_to_exit() {
        let calc = calculator(corridor(), PathfindingConfig::default());
        let outcome = calc.route(0, NodeId(1), &[NodeId(3)]).await.unwrap();
        let route = outcome.route().unwrap();
        assert_eq!(route.connectors, vec![ConnectorId(10), ConnectorId(11)]);
        assert_eq!(route.total_secs, 4.0);
    }

    #[tokio::test]
    async fn test_inactive_connector_is_avoided() {
        let mut seed = corridor();
        seed.connectors[0].active = false;
        let calc = calculator(seed, PathfindingConfig::default());
        let route = calc
            .route(0, NodeId(1), &[NodeId(3)])
            .await
            .unwrap()
            .into_route()
            .unwrap();
        assert_eq!(route.connectors, vec![ConnectorId(12), ConnectorId(13)]);
    }

    #[tokio::test]
    async fn test_full_node_is_not_a_hop_but_full_source_still_routes() {
        let mut seed = corridor();
        seed.nodes[0].current_occupancy = 80;
        seed.nodes[1].current_occupancy = 50;
        let calc = calculator(seed, PathfindingConfig::default());
        let route = calc
            .route(0, NodeId(1), &[NodeId(3)])
            .await
            .unwrap()
            .into_route()
            .unwrap();
        assert_eq!(route.connectors, vec![ConnectorId(12), ConnectorId(13)]);
    }

    #[tokio::test]
    async fn test_route_crosses_stairwell_to_upper_exit() {
        let seed = MapSeed {
            nodes: vec![
                node(1, &[0], "classroom"),
                node(2, &[0, 1], NODE_TYPE_STAIRS),
                node(3, &[1], "corridor"),
                node(4, &[1], NODE_TYPE_OUTDOOR),
            ],
            connectors: vec![conn(10, 1, 2, 5.0), conn(11, 2, 3, 5.0), conn(12, 3, 4, 1.0)],
        };
        let calc = calculator(seed, PathfindingConfig::default());
        let route = calc
            .route(0, NodeId(1), &[NodeId(4)])
            .await
            .unwrap()
            .into_route()
            .unwrap();
        assert_eq!(
            route.connectors,
            vec![ConnectorId(10), ConnectorId(11), ConnectorId(12)]
        );
        assert_eq!(route.exit, NodeId(4));
    }

    #[tokio::test]
    async fn test_missing_source_is_no_route() {
        let calc = calculator(corridor(), PathfindingConfig::default());
        let outcome = calc.route(0, NodeId(42), &[NodeId(3)]).await.unwrap();
        assert_eq!(outcome, RouteOutcome::NoRoute(NoRouteReason::SourceNotFound));
    }

    #[tokio::test]
    async fn test_unsafe_avoidance_is_opt_in() {
        let mut seed = corridor();
        seed.nodes[1].safe = false;

        let calc = calculator(seed.clone(), PathfindingConfig::default());
        let route = calc.route(0, NodeId(1), &[NodeId(3)]).await.unwrap().into_route().unwrap();
        assert_eq!(route.connectors, vec![ConnectorId(10), ConnectorId(11)]);

        let config = PathfindingConfig {
            avoid_unsafe_nodes: true,
            ..PathfindingConfig::default()
        };
        let calc = calculator(seed, config);
        let route = calc.route(0, NodeId(1), &[NodeId(3)]).await.unwrap().into_route().unwrap();
        assert_eq!(route.connectors, vec![ConnectorId(12), ConnectorId(13)]);
    }
}
