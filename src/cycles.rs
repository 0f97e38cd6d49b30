//! Cycle breaking and atomic-unit selection on the containment graph.
//!
//! Cycles are found by depth-first search with three-color marking. Each
//! cycle loses its lowest-confidence edge, ties going to the smallest
//! (source, target) pair, until the graph is acyclic.

use crate::graph::{ContainmentEdge, ContainmentGraph};
use crate::models::{AnomalyKind, ComponentId, ReviewRecord};
use rayon::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// An edge removed to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenCycle {
    pub removed: ContainmentEdge,
    /// Cycle members in edge order, starting at the smallest id
    pub cycle: Vec<ComponentId>,
}

impl BrokenCycle {
    pub fn to_review(&self) -> ReviewRecord {
        let mut subjects: Vec<String> = self.cycle.iter().map(ToString::to_string).collect();
        subjects.sort();

        let mut path: Vec<&str> = self.cycle.iter().map(ComponentId::as_str).collect();
        if let Some(first) = self.cycle.first() {
            path.push(first.as_str());
        }

        ReviewRecord::new(
            AnomalyKind::CycleBroken,
            subjects,
            format!(
                "removed {} -> {} ({}) from cycle {}; contributing edges: {}",
                self.removed.source,
                self.removed.target,
                self.removed.confidence,
                path.join(" -> "),
                self.removed.notes()
            ),
        )
    }
}

/// Find one cycle, visiting roots and children in id order.
///
/// Returns the cycle members in edge order (`c[i] -> c[i+1]`, last -> first).
pub fn find_cycle(graph: &ContainmentGraph) -> Option<Vec<ComponentId>> {
    let mut color: HashMap<&ComponentId, Color> = HashMap::with_capacity(graph.node_count());

    for root in graph.nodes() {
        if color.get(root).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }

        // (node, children, next child index); the stack is the gray path
        let mut stack: Vec<(&ComponentId, Vec<&ComponentId>, usize)> = Vec::new();
        color.insert(root, Color::Gray);
        stack.push((root, graph.children(root).collect(), 0));

        while let Some(frame) = stack.last_mut() {
            let next = if frame.2 < frame.1.len() {
                frame.2 += 1;
                Some(frame.1[frame.2 - 1])
            } else {
                None
            };

            match next {
                Some(child) => match color.get(child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child, Color::Gray);
                        stack.push((child, graph.children(child).collect(), 0));
                    }
                    Color::Gray => {
                        let start = stack.iter().position(|(node, _, _)| *node == child)?;
                        let cycle: Vec<ComponentId> =
                            stack[start..].iter().map(|(node, _, _)| (*node).clone()).collect();
                        return Some(rotate_to_min(cycle));
                    }
                    Color::Black => {}
                },
                None => {
                    let (node, _, _) = stack.pop()?;
                    color.insert(node, Color::Black);
                }
            }
        }
    }

    None
}

fn rotate_to_min(mut cycle: Vec<ComponentId>) -> Vec<ComponentId> {
    if let Some(min_idx) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_idx);
    }
    cycle
}

/// Edge of `cycle` to remove: lowest confidence, then smallest (source, target).
fn select_removal<'g>(
    graph: &'g ContainmentGraph,
    cycle: &[ComponentId],
) -> Option<&'g ContainmentEdge> {
    (0..cycle.len())
        .filter_map(|i| graph.edge(&cycle[i], &cycle[(i + 1) % cycle.len()]))
        .min_by(|a, b| {
            (a.confidence, &a.source, &a.target).cmp(&(b.confidence, &b.source, &b.target))
        })
}

/// Remove edges until `graph` is acyclic. Running it again changes nothing.
pub fn break_cycles(graph: &mut ContainmentGraph) -> Vec<BrokenCycle> {
    let mut broken = Vec::new();

    while let Some(cycle) = find_cycle(graph) {
        let Some((source, target)) =
            select_removal(graph, &cycle).map(|e| (e.source.clone(), e.target.clone()))
        else {
            break;
        };
        let Some(removed) = graph.remove_edge(&source, &target) else {
            break;
        };
        tracing::debug!(
            source = %removed.source,
            target = %removed.target,
            cycle_len = cycle.len(),
            "broke containment cycle"
        );
        broken.push(BrokenCycle { removed, cycle });
    }

    broken
}

/// Break cycles independently per weakly-connected region on the rayon pool.
///
/// The outcome is identical to [`break_cycles`] on the whole graph: cycles never
/// span regions and removals are reported in region order.
pub fn break_cycles_by_region(graph: ContainmentGraph) -> (ContainmentGraph, Vec<BrokenCycle>) {
    let results: Vec<(ContainmentGraph, Vec<BrokenCycle>)> = graph
        .into_regions()
        .into_par_iter()
        .map(|mut region| {
            let broken = if region.edge_count() == 0 {
                Vec::new()
            } else {
                break_cycles(&mut region)
            };
            (region, broken)
        })
        .collect();

    let mut broken = Vec::new();
    let mut regions = Vec::with_capacity(results.len());
    for (region, region_broken) in results {
        regions.push(region);
        broken.extend(region_broken);
    }

    (ContainmentGraph::from_regions(regions), broken)
}

pub fn is_acyclic(graph: &ContainmentGraph) -> bool {
    find_cycle(graph).is_none()
}

/// Components with no outgoing containment edge, in id order.
pub fn atomic_components(graph: &ContainmentGraph) -> Vec<ComponentId> {
    graph
        .nodes()
        .filter(|node| graph.out_degree(node) == 0)
        .cloned()
        .collect()
}
