//! Anchor selection for master units.
//!
//! The anchor is the most specific member entry of a unit: each numeric part
//! of its printed reference scores a point and a segment label scores one
//! more. Ties go to the configured edition priority, then to the smallest
//! entry id.

use crate::cluster::ComponentMap;
use crate::models::{
    Anchor, AnomalyKind, ComponentId, ConcordanceParams, Entry, EntryIndex, RefPart, ReviewRecord,
};
use rayon::prelude::*;

/// Split a printed reference on `.` into numeric and textual parts.
pub fn ref_parts(ref_label: &str) -> Vec<RefPart> {
    ref_label
        .split('.')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.bytes().all(|b| b.is_ascii_digit()) {
                p.parse().map(RefPart::Num).unwrap_or_else(|_| RefPart::Text(p.to_string()))
            } else {
                RefPart::Text(p.to_string())
            }
        })
        .collect()
}

/// Granularity score: one point per numeric reference part, one for a segment.
pub fn granularity_score(entry: &Entry) -> u32 {
    let numeric = ref_parts(&entry.ref_label)
        .iter()
        .filter(|p| matches!(p, RefPart::Num(_)))
        .count() as u32;
    numeric + u32::from(entry.segment_label().is_some())
}

/// (book, chapter) from the first two reference parts, when both are integers.
pub fn parse_book_chapter(ref_label: &str) -> Option<(u32, u32)> {
    match ref_parts(ref_label).as_slice() {
        [RefPart::Num(book), RefPart::Num(chapter), ..] => Some((*book, *chapter)),
        _ => None,
    }
}

/// Ordinal of a segment label: 0 when absent, the trailing number when present
/// (`seg2` -> 2), and `u32::MAX` for labels without one.
pub fn segment_ordinal(segment: Option<&str>) -> u32 {
    let Some(label) = segment else {
        return 0;
    };
    let digits: String = label
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(u32::MAX)
}

/// Pick the anchor among a unit's members.
///
/// Returns the anchor plus any review records (unresolved tie, unparsable reference).
/// None only when `members` is empty.
pub fn select_anchor(
    component: &ComponentId,
    members: &[&Entry],
    params: &ConcordanceParams,
) -> Option<(Anchor, Vec<ReviewRecord>)> {
    let mut reviews = Vec::new();

    let best_score = members.iter().map(|e| granularity_score(e)).max()?;
    let top: Vec<&Entry> = members
        .iter()
        .copied()
        .filter(|e| granularity_score(e) == best_score)
        .collect();

    let best_rank = top.iter().map(|e| params.edition_rank(&e.edition_id)).min()?;
    let mut tied: Vec<&Entry> = top
        .into_iter()
        .filter(|e| params.edition_rank(&e.edition_id) == best_rank)
        .collect();
    tied.sort_by(|a, b| a.id.cmp(&b.id));
    let anchor = *tied.first()?;

    if tied.len() > 1 {
        reviews.push(ReviewRecord::new(
            AnomalyKind::TieUnresolved,
            tied.iter().map(|e| e.id.clone()).collect(),
            format!(
                "anchor of component {}: {} entries share score {} and edition priority; chose {}",
                component,
                tied.len(),
                best_score,
                anchor.id
            ),
        ));
    }

    let (book, chapter, parsed) = match parse_book_chapter(&anchor.ref_label) {
        Some((book, chapter)) => (book, chapter, true),
        None => {
            reviews.push(ReviewRecord::new(
                AnomalyKind::UnparsableRef,
                vec![component.to_string(), anchor.id.clone()],
                format!(
                    "anchor reference {:?} of {} has no book.chapter; using bucket 0.0",
                    anchor.ref_label, anchor.id
                ),
            ));
            (0, 0, false)
        }
    };

    Some((
        Anchor {
            component: component.clone(),
            entry_id: anchor.id.clone(),
            granularity: best_score,
            book,
            chapter,
            parsed,
            ref_parts: ref_parts(&anchor.ref_label),
            segment_ordinal: segment_ordinal(anchor.segment_label()),
        },
        reviews,
    ))
}

/// Select anchors for all units in parallel; output follows `units` order.
pub fn select_anchors(
    units: &[ComponentId],
    components: &ComponentMap,
    entries: &EntryIndex<'_>,
    params: &ConcordanceParams,
) -> (Vec<Anchor>, Vec<ReviewRecord>) {
    let selected: Vec<Option<(Anchor, Vec<ReviewRecord>)>> = units
        .par_iter()
        .map(|unit| {
            let members: Vec<&Entry> = components
                .members(unit)
                .iter()
                .filter_map(|id| entries.get(id.as_str()).copied())
                .collect();
            select_anchor(unit, &members, params)
        })
        .collect();

    let mut anchors = Vec::with_capacity(units.len());
    let mut reviews = Vec::new();
    for (anchor, unit_reviews) in selected.into_iter().flatten() {
        anchors.push(anchor);
        reviews.extend(unit_reviews);
    }
    (anchors, reviews)
}
