//! Containment graph between equivalence components.
//!
//! Entry-level `contains` / `part_of` edges are normalized to the coarse -> fine
//! direction, lifted onto their components and collapsed so that each ordered
//! component pair carries at most one logical edge.

use crate::cluster::ComponentMap;
use crate::models::{AlignmentEdge, AnomalyKind, ComponentId, Confidence};
use crate::review::ReviewLog;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// One entry-level edge that contributed to a component edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeContribution {
    pub coarse_entry: String,
    pub fine_entry: String,
    pub confidence: Confidence,
    pub notes: String,
}

/// A collapsed containment edge: `source` contains `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentEdge {
    pub source: ComponentId,
    pub target: ComponentId,
    /// Maximum confidence of the contributing edges
    pub confidence: Confidence,
    /// Sorted by (coarse_entry, fine_entry)
    pub contributions: Vec<EdgeContribution>,
}

impl ContainmentEdge {
    /// Contributing notes with their provenance, e.g. `[beck:1.29>berendes:1.29] split`.
    pub fn notes(&self) -> String {
        self.contributions
            .iter()
            .map(|c| {
                let note = c.notes.trim();
                if note.is_empty() {
                    format!("[{}>{}]", c.coarse_entry, c.fine_entry)
                } else {
                    format!("[{}>{}] {}", c.coarse_entry, c.fine_entry, note)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn key(&self) -> (ComponentId, ComponentId) {
        (self.source.clone(), self.target.clone())
    }
}

/// Directed graph whose nodes are all components of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainmentGraph {
    nodes: BTreeSet<ComponentId>,
    edges: BTreeMap<(ComponentId, ComponentId), ContainmentEdge>,
    children: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
    parents: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
}

impl ContainmentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ComponentId) {
        self.nodes.insert(node);
    }

    /// Insert an edge, adding its endpoints as nodes. Self-loops are ignored.
    ///
    /// An existing edge for the same pair absorbs the new contributions.
    pub fn insert_edge(&mut self, edge: ContainmentEdge) {
        if edge.source == edge.target {
            return;
        }
        self.nodes.insert(edge.source.clone());
        self.nodes.insert(edge.target.clone());
        self.children
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        self.parents
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.source.clone());

        match self.edges.get_mut(&edge.key()) {
            Some(existing) => {
                existing.confidence = existing.confidence.max(edge.confidence);
                existing.contributions.extend(edge.contributions);
                existing.contributions.sort();
                existing.contributions.dedup();
            }
            None => {
                self.edges.insert(edge.key(), edge);
            }
        }
    }

    pub fn remove_edge(
        &mut self,
        source: &ComponentId,
        target: &ComponentId,
    ) -> Option<ContainmentEdge> {
        let removed = self.edges.remove(&(source.clone(), target.clone()))?;
        if let Some(set) = self.children.get_mut(source) {
            set.remove(target);
            if set.is_empty() {
                self.children.remove(source);
            }
        }
        if let Some(set) = self.parents.get_mut(target) {
            set.remove(source);
            if set.is_empty() {
                self.parents.remove(target);
            }
        }
        Some(removed)
    }

    pub fn edge(&self, source: &ComponentId, target: &ComponentId) -> Option<&ContainmentEdge> {
        self.edges.get(&(source.clone(), target.clone()))
    }

    /// Edges in (source, target) order.
    pub fn edges(&self) -> impl Iterator<Item = &ContainmentEdge> {
        self.edges.values()
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &ComponentId> {
        self.nodes.iter()
    }

    pub fn contains_node(&self, node: &ComponentId) -> bool {
        self.nodes.contains(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Components directly contained by `node`, in id order.
    pub fn children(&self, node: &ComponentId) -> impl Iterator<Item = &ComponentId> {
        self.children.get(node).into_iter().flatten()
    }

    /// Components directly containing `node`, in id order.
    pub fn parents(&self, node: &ComponentId) -> impl Iterator<Item = &ComponentId> {
        self.parents.get(node).into_iter().flatten()
    }

    pub fn out_degree(&self, node: &ComponentId) -> usize {
        self.children.get(node).map_or(0, BTreeSet::len)
    }

    pub fn in_degree(&self, node: &ComponentId) -> usize {
        self.parents.get(node).map_or(0, BTreeSet::len)
    }

    /// Neighbors in either direction, deduplicated, in id order.
    pub fn neighbors(&self, node: &ComponentId) -> BTreeSet<&ComponentId> {
        self.children(node).chain(self.parents(node)).collect()
    }

    /// Split into weakly-connected regions, ordered by their smallest node.
    ///
    /// Nodes without any edge form single-node regions.
    pub fn into_regions(self) -> Vec<ContainmentGraph> {
        let mut region_of: HashMap<ComponentId, usize> = HashMap::new();
        let mut regions: Vec<ContainmentGraph> = Vec::new();

        for start in &self.nodes {
            if region_of.contains_key(start) {
                continue;
            }
            let idx = regions.len();
            let mut region = ContainmentGraph::new();
            let mut queue = VecDeque::from([start.clone()]);
            region_of.insert(start.clone(), idx);

            while let Some(node) = queue.pop_front() {
                for next in self.neighbors(&node) {
                    if !region_of.contains_key(next) {
                        region_of.insert(next.clone(), idx);
                        queue.push_back(next.clone());
                    }
                }
                region.add_node(node);
            }
            regions.push(region);
        }

        for (key, edge) in self.edges {
            let idx = region_of[&key.0];
            regions[idx].insert_edge(edge);
        }

        regions
    }

    /// Reassemble a graph from disjoint regions.
    pub fn from_regions(regions: impl IntoIterator<Item = ContainmentGraph>) -> Self {
        let mut graph = ContainmentGraph::new();
        for region in regions {
            graph.nodes.extend(region.nodes);
            for (_, edge) in region.edges {
                graph.insert_edge(edge);
            }
        }
        graph
    }
}

/// Lift containment edges onto components and collapse them.
///
/// Edges with an unknown end are dropped as `reference_error`; edges whose ends
/// fall into the same component are dropped as `self_containment`.
pub fn build_containment_graph(
    components: &ComponentMap,
    edges: &[AlignmentEdge],
    review: &mut ReviewLog,
) -> ContainmentGraph {
    let mut graph = ContainmentGraph::new();
    for component in components.components() {
        graph.add_node(component.clone());
    }

    let mut pending: BTreeMap<(ComponentId, ComponentId), Vec<EdgeContribution>> = BTreeMap::new();

    for edge in edges {
        let Some((coarse, fine)) = edge.as_containment() else {
            continue;
        };

        let ends = (components.component_of(coarse), components.component_of(fine));
        let (source, target) = match ends {
            (Some(s), Some(t)) => (s, t),
            _ => {
                let mut missing: Vec<String> = [coarse, fine]
                    .into_iter()
                    .filter(|id| components.component_of(id).is_none())
                    .map(str::to_string)
                    .collect();
                missing.sort();
                missing.dedup();
                review.record(
                    AnomalyKind::ReferenceError,
                    missing,
                    format!(
                        "{} edge {} -> {} references an unknown entry; dropped",
                        edge.alignment_type, edge.entry_a, edge.entry_b
                    ),
                );
                continue;
            }
        };

        if source == target {
            review.record(
                AnomalyKind::SelfContainment,
                vec![source.to_string()],
                format!(
                    "{} edge {} -> {} joins entries of one equivalence component; dropped",
                    edge.alignment_type, edge.entry_a, edge.entry_b
                ),
            );
            continue;
        }

        pending
            .entry((source.clone(), target.clone()))
            .or_default()
            .push(EdgeContribution {
                coarse_entry: coarse.to_string(),
                fine_entry: fine.to_string(),
                confidence: edge.confidence,
                notes: edge.notes.trim().to_string(),
            });
    }

    for ((source, target), mut contributions) in pending {
        contributions.sort();
        contributions.dedup();
        let confidence = contributions
            .iter()
            .map(|c| c.confidence)
            .max()
            .unwrap_or(Confidence::Uncertain);
        graph.insert_edge(ContainmentEdge {
            source,
            target,
            confidence,
            contributions,
        });
    }

    tracing::debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "built containment graph"
    );

    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster_equivalents;
    use crate::models::Entry;

    fn cid(s: &str) -> ComponentId {
        ComponentId(s.to_string())
    }

    fn entries(ids: &[&str]) -> Vec<Entry> {
        ids.iter()
            .map(|id| {
                let (edition, reference) = id.split_once(':').unwrap_or(("ed", id));
                Entry::new(id, edition, reference)
            })
            .collect()
    }

    fn build(ids: &[&str], edges: &[AlignmentEdge]) -> (ContainmentGraph, ReviewLog) {
        let mut review = ReviewLog::new();
        let components = cluster_equivalents(&entries(ids), edges, &mut review).unwrap();
        let graph = build_containment_graph(&components, edges, &mut review);
        (graph, review)
    }

    #[test]
    fn test_contains_edges_between_singletons() {
        let edges = vec![
            AlignmentEdge::contains("beck:1.29", "berendes:1.29", Confidence::Certain),
            AlignmentEdge::contains("beck:1.29", "berendes:1.30", Confidence::Certain),
        ];
        let (graph, review) = build(&["beck:1.29", "berendes:1.29", "berendes:1.30"], &edges);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.out_degree(&cid("beck:1.29")), 2);
        assert_eq!(graph.out_degree(&cid("berendes:1.29")), 0);
        assert!(review.is_empty());
    }

    #[test]
    fn test_part_of_is_reversed() {
        let edges = vec![AlignmentEdge::part_of("fine:1", "coarse:1", Confidence::Probable)];
        let (graph, _) = build(&["coarse:1", "fine:1"], &edges);

        assert!(graph.edge(&cid("coarse:1"), &cid("fine:1")).is_some());
        assert!(graph.edge(&cid("fine:1"), &cid("coarse:1")).is_none());
    }

    #[test]
    fn test_parallel_edges_collapse_with_max_confidence() {
        let edges = vec![
            AlignmentEdge::equivalent("a:1", "a2:1"),
            AlignmentEdge::contains("a:1", "b:1", Confidence::Uncertain).with_notes("rough"),
            AlignmentEdge::contains("a2:1", "b:1", Confidence::Certain).with_notes("checked"),
            AlignmentEdge::part_of("b:1", "a2:1", Confidence::Probable),
        ];
        let (graph, _) = build(&["a:1", "a2:1", "b:1"], &edges);

        assert_eq!(graph.edge_count(), 1);
        // '2' sorts before ':', so a2:1 names the component
        assert!(graph.edge(&cid("a:1"), &cid("b:1")).is_none());
        let edge = graph.edge(&cid("a2:1"), &cid("b:1")).unwrap();
        assert_eq!(edge.confidence, Confidence::Certain);
        assert_eq!(edge.contributions.len(), 3);
        assert_eq!(edge.notes(), "[a2:1>b:1]; [a2:1>b:1] checked; [a:1>b:1] rough");
    }

    #[test]
    fn test_edge_inside_component_is_dropped() {
        let edges = vec![
            AlignmentEdge::equivalent("a:1", "b:1"),
            AlignmentEdge::contains("a:1", "b:1", Confidence::Certain),
        ];
        let (graph, review) = build(&["a:1", "b:1"], &edges);

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(review.count(AnomalyKind::SelfContainment), 1);
    }

    #[test]
    fn test_unknown_entry_is_reference_error() {
        let edges = vec![AlignmentEdge::contains("a:1", "ghost:1", Confidence::Certain)];
        let (graph, review) = build(&["a:1"], &edges);

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(review.count(AnomalyKind::ReferenceError), 1);
        assert_eq!(review.records()[0].subject_ids, vec!["ghost:1".to_string()]);
    }

    #[test]
    fn test_related_edges_ignored() {
        let edges = vec![AlignmentEdge::new(
            "a:1",
            "b:1",
            crate::models::AlignmentType::Related,
            Confidence::Certain,
        )];
        let (graph, review) = build(&["a:1", "b:1"], &edges);
        assert_eq!(graph.edge_count(), 0);
        assert!(review.is_empty());
    }

    #[test]
    fn test_regions_round_trip() {
        let edges = vec![
            AlignmentEdge::contains("a:1", "b:1", Confidence::Certain),
            AlignmentEdge::contains("c:1", "b:1", Confidence::Certain),
            AlignmentEdge::contains("x:1", "y:1", Confidence::Certain),
        ];
        let (graph, _) = build(&["a:1", "b:1", "c:1", "x:1", "y:1", "z:1"], &edges);
        let original = graph.clone();

        let regions = graph.into_regions();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].node_count(), 3);
        assert_eq!(regions[0].edge_count(), 2);
        assert_eq!(regions[1].node_count(), 2);
        assert_eq!(regions[2].node_count(), 1);

        assert_eq!(ContainmentGraph::from_regions(regions), original);
    }

    #[test]
    fn test_remove_edge_updates_adjacency() {
        let edges = vec![AlignmentEdge::contains("a:1", "b:1", Confidence::Certain)];
        let (mut graph, _) = build(&["a:1", "b:1"], &edges);

        assert!(graph.remove_edge(&cid("a:1"), &cid("b:1")).is_some());
        assert_eq!(graph.out_degree(&cid("a:1")), 0);
        assert_eq!(graph.in_degree(&cid("b:1")), 0);
        assert!(graph.contains_node(&cid("a:1")));
        assert!(graph.remove_edge(&cid("a:1"), &cid("b:1")).is_none());
    }
}
