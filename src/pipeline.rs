//! Concordance pipeline orchestration.
//!
//! This module runs the stages in order (clustering, containment graph,
//! cycle breaking, anchors, ids, coverage) and assembles the result tables.
//! Every stage is a pure function of the loaded input.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::anchor::select_anchors;
use crate::cluster::cluster_equivalents;
use crate::coverage::{membership_rows, resolve_coverage, EditionIndex};
use crate::cycles::{atomic_components, break_cycles_by_region, BrokenCycle};
use crate::db::{load_input, load_registry, DbError};
use crate::graph::build_containment_graph;
use crate::ids::assign_ids;
use crate::models::*;
use crate::review::ReviewLog;

#[derive(Error, Debug)]
pub enum ConcordanceError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Reject input missing required fields or carrying duplicate entry ids.
pub fn validate_input(entries: &[Entry], edges: &[AlignmentEdge]) -> Result<(), SchemaError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(entries.len());
    for (row, entry) in entries.iter().enumerate() {
        let required = [
            ("id", &entry.id),
            ("edition_id", &entry.edition_id),
            ("ref", &entry.ref_label),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(SchemaError::MissingEntryField { row, field: *field });
        }
        if !seen.insert(entry.id.as_str()) {
            return Err(SchemaError::DuplicateEntry(entry.id.clone()));
        }
    }

    for (row, edge) in edges.iter().enumerate() {
        if edge.entry_a.trim().is_empty() {
            return Err(SchemaError::MissingAlignmentField { row, field: "entry_a" });
        }
        if edge.entry_b.trim().is_empty() {
            return Err(SchemaError::MissingAlignmentField { row, field: "entry_b" });
        }
    }

    Ok(())
}

/// Coverage column order: prioritized editions first, the rest alphabetically.
pub fn edition_columns(entries: &[Entry], params: &ConcordanceParams) -> Vec<String> {
    let editions: BTreeSet<&str> = entries.iter().map(|e| e.edition_id.as_str()).collect();
    let mut editions: Vec<&str> = editions.into_iter().collect();
    editions.sort_by_key(|e| (params.edition_rank(e), *e));
    editions.into_iter().map(str::to_string).collect()
}

/// Build the full concordance from loaded entries and edges.
///
/// `registry` is the previously frozen id snapshot, if any.
pub fn build_concordance(
    entries: &[Entry],
    edges: &[AlignmentEdge],
    registry: Option<&IdRegistry>,
    params: &ConcordanceParams,
    show_progress: bool,
) -> Result<ConcordanceResult, ConcordanceError> {
    validate_input(entries, edges)?;
    tracing::info!(
        entries = entries.len(),
        alignments = edges.len(),
        "building concordance"
    );

    let mut review = ReviewLog::new();

    // Equivalence components
    let components = cluster_equivalents(entries, edges, &mut review)?;
    tracing::info!(components = components.component_count(), "clustered entries");

    // Containment graph, then make it acyclic region by region
    let graph = build_containment_graph(&components, edges, &mut review);
    let containment_edge_count = graph.edge_count();
    tracing::info!(edges = containment_edge_count, "built containment graph");

    let (dag, broken) = break_cycles_by_region(graph);
    review.extend(broken.iter().map(BrokenCycle::to_review));
    if !broken.is_empty() {
        tracing::info!(removed = broken.len(), "broke containment cycles");
    }

    let atomic = atomic_components(&dag);
    tracing::info!(units = atomic.len(), "selected atomic units");

    // Anchors and ids
    let index = index_entries(entries);
    let (anchors, anchor_reviews) = select_anchors(&atomic, &components, &index, params);
    review.extend(anchor_reviews);

    let mut assignment = assign_ids(&anchors, &components, &index, registry, params)?;
    review.extend(std::mem::take(&mut assignment.reviews));
    tracing::info!(
        minted = assignment.minted,
        reused = assignment.reused,
        deprecated = assignment.deprecated,
        "assigned master ids"
    );

    // Coverage projection
    let editions = edition_columns(entries, params);
    let edition_index = EditionIndex::new(&components, &index);
    let (coverage, coverage_reviews) = resolve_coverage(
        &assignment.units,
        &dag,
        &edition_index,
        &editions,
        params,
        show_progress,
    );
    review.extend(coverage_reviews);
    let membership = membership_rows(&assignment.units, &coverage);

    let count_cells = |match_type: MatchType| {
        coverage
            .iter()
            .filter(|c| c.match_type == match_type)
            .count()
    };
    let reviews = review.into_sorted();

    let summary = ConcordanceSummary {
        entry_count: entries.len(),
        alignment_count: edges.len(),
        component_count: components.component_count(),
        containment_edge_count,
        cycles_broken: broken.len(),
        master_unit_count: assignment.units.len(),
        minted_ids: assignment.minted,
        reused_ids: assignment.reused,
        deprecated_ids: assignment.deprecated,
        exact_cells: count_cells(MatchType::Exact),
        fallback_cells: count_cells(MatchType::FallbackContains),
        missing_cells: count_cells(MatchType::Missing),
        review_count: reviews.len(),
    };
    tracing::info!(
        units = summary.master_unit_count,
        exact = summary.exact_cells,
        fallback = summary.fallback_cells,
        missing = summary.missing_cells,
        reviews = summary.review_count,
        "concordance complete"
    );

    Ok(ConcordanceResult {
        version: env!("CARGO_PKG_VERSION").to_string(),
        parameters: params.clone(),
        summary,
        editions,
        units: assignment.units,
        membership,
        coverage,
        reviews,
        registry: assignment.registry,
    })
}

/// Load a database (and optionally a frozen registry) and build the concordance.
pub fn build_concordance_from_db(
    db_path: &Path,
    registry_path: Option<&Path>,
    params: &ConcordanceParams,
    show_progress: bool,
) -> Result<ConcordanceResult, ConcordanceError> {
    let (entries, edges) = load_input(db_path)?;
    let registry = registry_path.map(load_registry).transpose()?;
    build_concordance(&entries, &edges, registry.as_ref(), params, show_progress)
}

/// Synthetic corpus for benchmarks: `books` x `chapters` chapters, each split
/// into `segments` segments in a fine edition, with a coarse edition per
/// chapter and an equivalent edition per segment.
pub fn synthetic_corpus(
    books: u32,
    chapters: u32,
    segments: u32,
) -> (Vec<Entry>, Vec<AlignmentEdge>) {
    let mut entries = Vec::new();
    let mut edges = Vec::new();

    for book in 1..=books {
        for chapter in 1..=chapters {
            let reference = format!("{}.{}", book, chapter);
            let coarse = format!("sprengel:{}", reference);
            entries.push(Entry::new(&coarse, "sprengel", &reference).with_term("herba"));

            for seg in 1..=segments {
                let segment = format!("seg{}", seg);
                let fine = format!("berendes:{}:{}", reference, segment);
                let twin = format!("beck:{}:{}", reference, segment);
                entries.push(Entry::new(&fine, "berendes", &reference).with_segment(&segment));
                entries.push(Entry::new(&twin, "beck", &reference).with_segment(&segment));
                edges.push(AlignmentEdge::equivalent(&fine, &twin));
                edges.push(AlignmentEdge::contains(&coarse, &fine, Confidence::Certain));
            }
        }
    }

    (entries, edges)
}
