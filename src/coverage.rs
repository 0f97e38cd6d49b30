//! Per-edition coverage of master units.
//!
//! Each (unit, edition) cell is resolved as exact when the unit's component
//! holds an entry of that edition. Otherwise the containment graph is searched
//! breadth-first in both directions and the nearest entry of that edition is
//! used as a `fallback_contains` substitute. Cells with no reachable entry are
//! missing.

use crate::cluster::ComponentMap;
use crate::graph::ContainmentGraph;
use crate::models::{
    AnomalyKind, ComponentId, ConcordanceParams, CoverageRecord, Entry, EntryIndex, MasterUnit,
    MatchType, MembershipRow, ReviewRecord,
};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Entries of each component grouped by edition, sorted by entry id.
#[derive(Debug, Default)]
pub struct EditionIndex<'a> {
    by_component: HashMap<&'a ComponentId, BTreeMap<&'a str, Vec<&'a Entry>>>,
}

impl<'a> EditionIndex<'a> {
    pub fn new(components: &'a ComponentMap, entries: &EntryIndex<'a>) -> Self {
        let mut by_component: HashMap<&'a ComponentId, BTreeMap<&'a str, Vec<&'a Entry>>> =
            HashMap::with_capacity(components.component_count());
        for (component, members) in components.iter() {
            let editions = by_component.entry(component).or_default();
            for member in members {
                if let Some(&entry) = entries.get(member.as_str()) {
                    editions
                        .entry(entry.edition_id.as_str())
                        .or_default()
                        .push(entry);
                }
            }
        }
        Self { by_component }
    }

    /// Entries of `edition` in `component`, sorted by id.
    pub fn entries(&self, component: &ComponentId, edition: &str) -> &[&'a Entry] {
        self.by_component
            .get(component)
            .and_then(|editions| editions.get(edition))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
    )
    .map(|s| s.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Resolve coverage for every unit against every edition.
///
/// Records are unit-major and edition-minor, following the order of `units`
/// and `editions`.
pub fn resolve_coverage(
    units: &[MasterUnit],
    graph: &ContainmentGraph,
    index: &EditionIndex<'_>,
    editions: &[String],
    params: &ConcordanceParams,
    show_progress: bool,
) -> (Vec<CoverageRecord>, Vec<ReviewRecord>) {
    let progress = show_progress.then(|| progress_bar(units.len()));

    let resolved: Vec<(Vec<CoverageRecord>, Vec<ReviewRecord>)> = units
        .par_iter()
        .map(|unit| {
            let row = resolve_unit(unit, graph, index, editions, params);
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
            row
        })
        .collect();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let mut records = Vec::with_capacity(units.len() * editions.len());
    let mut reviews = Vec::new();
    for (row, row_reviews) in resolved {
        records.extend(row);
        reviews.extend(row_reviews);
    }
    (records, reviews)
}

/// Resolve one coverage row with a single level-by-level search from the unit.
pub fn resolve_unit(
    unit: &MasterUnit,
    graph: &ContainmentGraph,
    index: &EditionIndex<'_>,
    editions: &[String],
    params: &ConcordanceParams,
) -> (Vec<CoverageRecord>, Vec<ReviewRecord>) {
    let mut cells: Vec<Option<CoverageRecord>> = vec![None; editions.len()];
    let mut reviews = Vec::new();

    for (cell, edition) in cells.iter_mut().zip(editions) {
        if let [entry, rest @ ..] = index.entries(&unit.component, edition) {
            let notes = if rest.is_empty() {
                String::new()
            } else {
                let others: Vec<&str> = rest.iter().map(|e| e.id.as_str()).collect();
                format!("also in unit: {}", others.join(", "))
            };
            *cell = Some(CoverageRecord {
                master_id: unit.master_id.clone(),
                edition_id: edition.clone(),
                match_type: MatchType::Exact,
                entry: Some((*entry).clone()),
                distance: 0,
                notes,
            });
        }
    }

    let mut pending = cells.iter().filter(|c| c.is_none()).count();
    let mut visited: HashSet<&ComponentId> = HashSet::from([&unit.component]);
    let mut frontier: BTreeSet<&ComponentId> = BTreeSet::from([&unit.component]);
    let mut distance = 0u32;

    while pending > 0 && !frontier.is_empty() {
        distance += 1;
        if params.max_fallback_distance.is_some_and(|max| distance > max) {
            break;
        }

        let mut next: BTreeSet<&ComponentId> = BTreeSet::new();
        for node in &frontier {
            for neighbor in graph.neighbors(node) {
                if visited.insert(neighbor) {
                    next.insert(neighbor);
                }
            }
        }

        for (cell, edition) in cells.iter_mut().zip(editions) {
            if cell.is_some() {
                continue;
            }
            let mut candidates: Vec<(&Entry, &ComponentId)> = next
                .iter()
                .flat_map(|&component| {
                    index
                        .entries(component, edition)
                        .iter()
                        .map(move |&entry| (entry, component))
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| a.0.id.cmp(&b.0.id));
            let (entry, via) = candidates[0];

            let mut notes = format!(
                "nearest {} entry at distance {} in component {}",
                edition, distance, via
            );
            if candidates.len() > 1 {
                let tied: Vec<String> = candidates.iter().map(|(e, _)| e.id.clone()).collect();
                notes.push_str(&format!("; tied with {}", tied[1..].join(", ")));
                reviews.push(ReviewRecord::new(
                    AnomalyKind::TieUnresolved,
                    tied,
                    format!(
                        "coverage of {} in {}: {} entries at distance {}; chose {}",
                        unit.master_id,
                        edition,
                        candidates.len(),
                        distance,
                        entry.id
                    ),
                ));
            }

            *cell = Some(CoverageRecord {
                master_id: unit.master_id.clone(),
                edition_id: edition.clone(),
                match_type: MatchType::FallbackContains,
                entry: Some(entry.clone()),
                distance,
                notes,
            });
            pending -= 1;
        }

        frontier = next;
    }

    let records = cells
        .into_iter()
        .zip(editions)
        .map(|(cell, edition)| {
            cell.unwrap_or_else(|| CoverageRecord {
                master_id: unit.master_id.clone(),
                edition_id: edition.clone(),
                match_type: MatchType::Missing,
                entry: None,
                distance: 0,
                notes: String::new(),
            })
        })
        .collect();

    (records, reviews)
}

/// Membership table: every member of each unit as `exact`, then the entries
/// substituted by fallback resolution.
pub fn membership_rows(units: &[MasterUnit], coverage: &[CoverageRecord]) -> Vec<MembershipRow> {
    let mut fallback: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for record in coverage {
        if record.match_type != MatchType::FallbackContains {
            continue;
        }
        if let Some(entry) = &record.entry {
            fallback
                .entry(record.master_id.as_str())
                .or_default()
                .insert(entry.id.as_str());
        }
    }

    let mut rows = Vec::new();
    for unit in units {
        rows.extend(unit.members.iter().map(|member| MembershipRow {
            master_id: unit.master_id.clone(),
            entry_id: member.clone(),
            relationship_hint: MatchType::Exact,
        }));
        if let Some(entries) = fallback.get(unit.master_id.as_str()) {
            rows.extend(entries.iter().map(|entry_id| MembershipRow {
                master_id: unit.master_id.clone(),
                entry_id: entry_id.to_string(),
                relationship_hint: MatchType::FallbackContains,
            }));
        }
    }
    rows
}
