//! Property tests over randomly generated corpora.

use dmm_concordance::cluster::cluster_equivalents;
use dmm_concordance::cycles::{break_cycles, break_cycles_by_region, is_acyclic};
use dmm_concordance::graph::{build_containment_graph, ContainmentGraph};
use dmm_concordance::models::{
    AlignmentEdge, AlignmentType, ComponentId, ConcordanceParams, ConcordanceResult, Confidence,
    Entry, MatchType,
};
use dmm_concordance::output::{
    write_coverage_csv, write_membership_csv, write_review_csv, write_units_csv,
};
use dmm_concordance::pipeline::build_concordance;
use dmm_concordance::review::ReviewLog;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};

const EDITIONS: [&str; 4] = ["wellmann", "berendes", "beck", "laguna"];
const TYPES: [AlignmentType; 4] = [
    AlignmentType::Equivalent,
    AlignmentType::Contains,
    AlignmentType::PartOf,
    AlignmentType::Related,
];
const CONFIDENCES: [Confidence; 3] = [
    Confidence::Uncertain,
    Confidence::Probable,
    Confidence::Certain,
];

fn corpus() -> impl Strategy<Value = (Vec<Entry>, Vec<AlignmentEdge>)> {
    (2usize..14)
        .prop_flat_map(|n| {
            let entries = prop::collection::vec(
                (0..EDITIONS.len(), 1u32..5, prop::option::of(1u32..4), any::<bool>()),
                n,
            );
            let edges = prop::collection::vec(
                (0..n, 0..n, 0..TYPES.len(), 0..CONFIDENCES.len()),
                0..2 * n,
            );
            (entries, edges)
        })
        .prop_map(|(entry_specs, edge_specs)| {
            let entries: Vec<Entry> = entry_specs
                .iter()
                .enumerate()
                .map(|(i, &(edition, chapter, sub, segmented))| {
                    let reference = match sub {
                        Some(sub) => format!("1.{}.{}", chapter, sub),
                        None => format!("1.{}", chapter),
                    };
                    let id = format!("{}:{}", EDITIONS[edition], i);
                    let entry = Entry::new(&id, EDITIONS[edition], &reference);
                    if segmented {
                        entry.with_segment(&format!("seg{}", i % 3 + 1))
                    } else {
                        entry
                    }
                })
                .collect();
            let edges = edge_specs
                .iter()
                .map(|&(a, b, kind, confidence)| {
                    AlignmentEdge::new(
                        &entries[a].id,
                        &entries[b].id,
                        TYPES[kind],
                        CONFIDENCES[confidence],
                    )
                })
                .collect();
            (entries, edges)
        })
}

fn render(result: &ConcordanceResult) -> Vec<u8> {
    let mut buf = Vec::new();
    write_units_csv(&result.units, &mut buf).unwrap();
    write_membership_csv(&result.membership, &mut buf).unwrap();
    write_review_csv(&result.reviews, &mut buf).unwrap();
    write_coverage_csv(result, &mut buf).unwrap();
    buf
}

fn dag(entries: &[Entry], edges: &[AlignmentEdge]) -> ContainmentGraph {
    let mut review = ReviewLog::new();
    let components = cluster_equivalents(entries, edges, &mut review).unwrap();
    let graph = build_containment_graph(&components, edges, &mut review);
    break_cycles_by_region(graph).0
}

/// Undirected hop distance from `start` to every reachable component.
fn distances<'g>(
    graph: &'g ContainmentGraph,
    start: &'g ComponentId,
) -> HashMap<&'g ComponentId, u32> {
    let mut dist = HashMap::from([(start, 0)]);
    let mut frontier = vec![start];
    let mut d = 0;
    while !frontier.is_empty() {
        d += 1;
        let mut next = Vec::new();
        for node in frontier {
            for neighbor in graph.neighbors(node) {
                if !dist.contains_key(neighbor) {
                    dist.insert(neighbor, d);
                    next.push(neighbor);
                }
            }
        }
        frontier = next;
    }
    dist
}

proptest! {
    #[test]
    fn prop_outputs_independent_of_input_order(
        (entries, edges, shuffled_entries, shuffled_edges) in corpus().prop_flat_map(|(e, g)| {
            (Just(e.clone()), Just(g.clone()), Just(e).prop_shuffle(), Just(g).prop_shuffle())
        })
    ) {
        let params = ConcordanceParams::default();
        let a = build_concordance(&entries, &edges, None, &params, false).unwrap();
        let b = build_concordance(&shuffled_entries, &shuffled_edges, None, &params, false)
            .unwrap();
        prop_assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn prop_cycle_breaking_yields_stable_dag((entries, edges) in corpus()) {
        let mut graph = dag(&entries, &edges);
        prop_assert!(is_acyclic(&graph));
        let settled = graph.clone();
        prop_assert!(break_cycles(&mut graph).is_empty());
        prop_assert_eq!(graph, settled);
    }

    #[test]
    fn prop_units_are_distinct_atomic_components((entries, edges) in corpus()) {
        let params = ConcordanceParams::default();
        let result = build_concordance(&entries, &edges, None, &params, false).unwrap();
        let graph = dag(&entries, &edges);

        let atomic: BTreeSet<&ComponentId> =
            graph.nodes().filter(|n| graph.out_degree(n) == 0).collect();
        let units: BTreeSet<&ComponentId> = result.units.iter().map(|u| &u.component).collect();
        prop_assert_eq!(units, atomic);

        let ids: HashSet<&str> = result.units.iter().map(|u| u.master_id.as_str()).collect();
        prop_assert_eq!(ids.len(), result.units.len());

        // Every entry sits in exactly one component
        let components = cluster_equivalents(&entries, &edges, &mut ReviewLog::new()).unwrap();
        let mut seen = HashSet::new();
        for (component, members) in components.iter() {
            prop_assert!(graph.contains_node(component));
            for member in members {
                prop_assert!(seen.insert(member.as_str()));
                prop_assert_eq!(components.component_of(member), Some(component));
            }
        }
        prop_assert_eq!(seen.len(), entries.len());
        prop_assert_eq!(components.component_count(), graph.node_count());
    }

    #[test]
    fn prop_fallback_is_minimal((entries, edges) in corpus()) {
        let params = ConcordanceParams::default();
        let result = build_concordance(&entries, &edges, None, &params, false).unwrap();
        let graph = dag(&entries, &edges);
        let by_id: HashMap<&str, &Entry> = entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut review = ReviewLog::new();
        let components = cluster_equivalents(&entries, &edges, &mut review).unwrap();

        for (idx, unit) in result.units.iter().enumerate() {
            let dist = distances(&graph, &unit.component);
            for cell in result.coverage_row(idx) {
                // Minimal distance at which any entry of the edition is reachable
                let best = dist
                    .iter()
                    .filter(|(component, _)| {
                        components
                            .members(component)
                            .iter()
                            .any(|m| by_id[m.as_str()].edition_id == cell.edition_id)
                    })
                    .map(|(_, d)| *d)
                    .min();

                match cell.match_type {
                    MatchType::Exact => prop_assert_eq!(best, Some(0)),
                    MatchType::FallbackContains => {
                        prop_assert_eq!(best, Some(cell.distance));
                        prop_assert!(cell.distance > 0);
                    }
                    MatchType::Missing => prop_assert_eq!(best, None),
                }
            }
        }
    }
}
