//! Permanent master-id assignment.
//!
//! Units are grouped by their anchor's (book, chapter) and ordered inside a
//! group by reference parts, segment ordinal and anchor entry id. Each group
//! gets a 1..n section counter and ids take the form
//! `{prefix}{book}.{chapter:0W}.{section}`.
//!
//! When a frozen registry is supplied its ids are authoritative: a unit that
//! maps one-to-one onto a frozen record keeps that id, splits and merges get
//! fresh ids with `replaces` / `replaced_by` links, and no id is ever handed
//! out twice.

use crate::cluster::ComponentMap;
use crate::models::{
    Anchor, AnomalyKind, ConcordanceParams, EntryIndex, IdRecord, IdRegistry, IdStatus,
    MasterUnit, ReviewRecord, SchemaError,
};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Result of id assignment.
#[derive(Debug, Clone, Default)]
pub struct IdAssignment {
    /// Units in table order
    pub units: Vec<MasterUnit>,
    /// Next frozen snapshot, sorted by id
    pub registry: IdRegistry,
    pub minted: usize,
    pub reused: usize,
    /// Records deprecated by this run
    pub deprecated: usize,
    /// Kept ids whose anchor moved out of the id's bucket
    pub reviews: Vec<ReviewRecord>,
}

/// Compose a master id.
pub fn mint_id(prefix: &str, book: u32, chapter: u32, width: usize, section: u32) -> String {
    format!("{prefix}{book}.{chapter:0width$}.{section}")
}

/// Book, chapter and section of a minted id.
///
/// Read from the right so an id minted under an earlier prefix still parses:
/// the book is the digit run right after `prefix`, or else the trailing
/// digits before the first of the last two dots.
pub fn parse_master_id(master_id: &str, prefix: &str) -> Option<(u32, u32, u32)> {
    let mut parts = master_id.rsplitn(3, '.');
    let section = parts.next()?.parse().ok()?;
    let chapter = parts.next()?.parse().ok()?;
    let head = parts.next()?;
    let book = match head.strip_prefix(prefix) {
        Some(rest) if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) => rest,
        _ => &head[head.trim_end_matches(|c: char| c.is_ascii_digit()).len()..],
    };
    Some((book.parse().ok()?, chapter, section))
}

/// Total order of units: bucket, reference parts, segment ordinal, anchor entry id.
pub fn compare_anchors(a: &Anchor, b: &Anchor) -> Ordering {
    (a.book, a.chapter)
        .cmp(&(b.book, b.chapter))
        .then_with(|| a.ref_parts.cmp(&b.ref_parts))
        .then_with(|| a.segment_ordinal.cmp(&b.segment_ordinal))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// How a current unit relates to the frozen registry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    /// One-to-one with a frozen record; keeps its id
    Keep(usize),
    /// Needs a new id; replaces these frozen records (possibly none)
    Mint(Vec<usize>),
}

/// Assign permanent ids to the anchored units.
///
/// Fails only when the registry itself is malformed.
pub fn assign_ids(
    anchors: &[Anchor],
    components: &ComponentMap,
    entries: &EntryIndex<'_>,
    registry: Option<&IdRegistry>,
    params: &ConcordanceParams,
) -> Result<IdAssignment, SchemaError> {
    let empty = IdRegistry::default();
    let registry = registry.unwrap_or(&empty);
    registry.validate()?;

    let mut order: Vec<&Anchor> = anchors.iter().collect();
    order.sort_by(|a, b| compare_anchors(a, b));

    let members: Vec<&[String]> = order
        .iter()
        .map(|a| components.members(&a.component))
        .collect();

    let claims = reconcile(&members, registry)?;

    // Ids that may never be minted again
    let mut taken: HashSet<String> = registry.records.iter().map(|r| r.master_id.clone()).collect();
    // Positions held by frozen ids, whatever prefix they were minted under
    let held: HashSet<(u32, u32, u32)> = registry
        .records
        .iter()
        .filter_map(|r| parse_master_id(&r.master_id, &params.id_prefix))
        .collect();
    let mut next_section: HashMap<(u32, u32), u32> = HashMap::new();

    let mut assignment = IdAssignment::default();
    let mut new_ids: Vec<String> = Vec::with_capacity(order.len());
    let mut records: Vec<IdRecord> = Vec::new();

    for (i, anchor) in order.iter().enumerate() {
        let (master_id, (book, chapter, section), replaces) = match &claims[i] {
            Claim::Keep(r) => {
                let record = &registry.records[*r];
                assignment.reused += 1;
                // The row describes the kept id, not the anchor's current bucket
                let position = match parse_master_id(&record.master_id, &params.id_prefix) {
                    Some((book, chapter, section)) => {
                        if (book, chapter) != (anchor.book, anchor.chapter) {
                            assignment.reviews.push(ReviewRecord::new(
                                AnomalyKind::IdBucketMismatch,
                                vec![record.master_id.clone(), anchor.entry_id.clone()],
                                format!(
                                    "kept id {} is in {}.{} but anchor {} is now in {}.{}",
                                    record.master_id,
                                    book,
                                    chapter,
                                    anchor.entry_id,
                                    anchor.book,
                                    anchor.chapter
                                ),
                            ));
                        }
                        (book, chapter, section)
                    }
                    None => {
                        assignment.reviews.push(ReviewRecord::new(
                            AnomalyKind::IdBucketMismatch,
                            vec![record.master_id.clone(), anchor.entry_id.clone()],
                            format!(
                                "kept id {} has no book.chapter.section; anchor {} is in {}.{}",
                                record.master_id,
                                anchor.entry_id,
                                anchor.book,
                                anchor.chapter
                            ),
                        ));
                        (anchor.book, anchor.chapter, 0)
                    }
                };
                (record.master_id.clone(), position, record.replaces.clone())
            }
            Claim::Mint(replaced) => {
                let counter = next_section.entry((anchor.book, anchor.chapter)).or_insert(1);
                let (master_id, section) = loop {
                    let candidate = mint_id(
                        &params.id_prefix,
                        anchor.book,
                        anchor.chapter,
                        params.chapter_width,
                        *counter,
                    );
                    let section = *counter;
                    *counter += 1;
                    let position = (anchor.book, anchor.chapter, section);
                    if !taken.contains(&candidate) && !held.contains(&position) {
                        break (candidate, section);
                    }
                };
                taken.insert(master_id.clone());
                assignment.minted += 1;
                let mut replaces: Vec<String> = replaced
                    .iter()
                    .map(|r| registry.records[*r].master_id.clone())
                    .collect();
                replaces.sort();
                (master_id, (anchor.book, anchor.chapter, section), replaces)
            }
        };

        let label = entries
            .get(anchor.entry_id.as_str())
            .map(|e| e.display_term())
            .filter(|t| !t.is_empty())
            .unwrap_or(anchor.entry_id.as_str())
            .to_string();

        records.push(IdRecord {
            master_id: master_id.clone(),
            status: IdStatus::Active,
            anchor_entry_id: anchor.entry_id.clone(),
            members: members[i].to_vec(),
            replaces,
            replaced_by: Vec::new(),
        });

        assignment.units.push(MasterUnit {
            master_id: master_id.clone(),
            book,
            chapter,
            section,
            anchor_entry_id: anchor.entry_id.clone(),
            label,
            component: anchor.component.clone(),
            members: members[i].to_vec(),
        });
        new_ids.push(master_id);
    }

    // Frozen records: carried forward, kept, or turned into tombstones
    let mut successors: HashMap<usize, Vec<String>> = HashMap::new();
    let mut kept: HashSet<usize> = HashSet::new();
    for (i, claim) in claims.iter().enumerate() {
        match claim {
            Claim::Keep(r) => {
                kept.insert(*r);
            }
            Claim::Mint(replaced) => {
                for r in replaced {
                    successors.entry(*r).or_default().push(new_ids[i].clone());
                }
            }
        }
    }

    for (r, record) in registry.records.iter().enumerate() {
        if kept.contains(&r) {
            continue;
        }
        match record.status {
            IdStatus::Deprecated => records.push(record.clone()),
            IdStatus::Active => {
                let mut replaced_by = successors.remove(&r).unwrap_or_default();
                replaced_by.sort();
                tracing::info!(
                    master_id = %record.master_id,
                    replaced_by = ?replaced_by,
                    "deprecating master id"
                );
                assignment.deprecated += 1;
                records.push(IdRecord {
                    status: IdStatus::Deprecated,
                    replaced_by,
                    ..record.clone()
                });
            }
        }
    }

    records.sort_by(|a, b| a.master_id.cmp(&b.master_id));
    assignment.registry = IdRegistry { records };

    Ok(assignment)
}

/// Match current units (by member set) against active frozen records.
fn reconcile(units: &[&[String]], registry: &IdRegistry) -> Result<Vec<Claim>, SchemaError> {
    let mut record_of_entry: HashMap<&str, usize> = HashMap::new();
    for (r, record) in registry.records.iter().enumerate() {
        if record.status != IdStatus::Active {
            continue;
        }
        for member in &record.members {
            if let Some(other) = record_of_entry.insert(member.as_str(), r) {
                return Err(SchemaError::MalformedRegistryRecord {
                    master_id: record.master_id.clone(),
                    reason: format!(
                        "entry {} also belongs to active record {}",
                        member, registry.records[other].master_id
                    ),
                });
            }
        }
    }

    let overlaps: Vec<BTreeSet<usize>> = units
        .iter()
        .map(|members| {
            members
                .iter()
                .filter_map(|m| record_of_entry.get(m.as_str()).copied())
                .collect()
        })
        .collect();

    let mut units_per_record: HashMap<usize, usize> = HashMap::new();
    for records in &overlaps {
        for r in records {
            *units_per_record.entry(*r).or_default() += 1;
        }
    }

    Ok(overlaps
        .into_iter()
        .map(|records| {
            match records.iter().next() {
                Some(&r) if records.len() == 1 && units_per_record.get(&r) == Some(&1) => {
                    Claim::Keep(r)
                }
                _ => Claim::Mint(records.into_iter().collect()),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::select_anchors;
    use crate::cluster::cluster_equivalents;
    use crate::models::{index_entries, AlignmentEdge, Entry};
    use crate::review::ReviewLog;

    fn run(
        entries: &[Entry],
        edges: &[AlignmentEdge],
        registry: Option<&IdRegistry>,
    ) -> IdAssignment {
        run_with(entries, edges, registry, &ConcordanceParams::default())
    }

    fn run_with(
        entries: &[Entry],
        edges: &[AlignmentEdge],
        registry: Option<&IdRegistry>,
        params: &ConcordanceParams,
    ) -> IdAssignment {
        let components = cluster_equivalents(entries, edges, &mut ReviewLog::new()).unwrap();
        let units: Vec<_> = components.components().cloned().collect();
        let index = index_entries(entries);
        let (anchors, _) = select_anchors(&units, &components, &index, params);
        assign_ids(&anchors, &components, &index, registry, params).unwrap()
    }

    fn ids(assignment: &IdAssignment) -> Vec<(&str, &str)> {
        assignment
            .units
            .iter()
            .map(|u| (u.anchor_entry_id.as_str(), u.master_id.as_str()))
            .collect()
    }

    fn seg(id: &str, reference: &str, segment: &str) -> Entry {
        Entry::new(id, "berendes", reference).with_segment(segment)
    }

    #[test]
    fn test_mint_and_parse_id() {
        assert_eq!(mint_id("MMK-", 1, 29, 3, 2), "MMK-1.029.2");
        assert_eq!(mint_id("MMK-", 4, 162, 3, 1), "MMK-4.162.1");
        assert_eq!(parse_master_id("MMK-1.029.2", "MMK-"), Some((1, 29, 2)));
        assert_eq!(parse_master_id("DMM4.0162.1", "DMM"), Some((4, 162, 1)));
        assert_eq!(parse_master_id("MMK-1.029", "MMK-"), None);
        assert_eq!(parse_master_id("MMK-x.029.2", "MMK-"), None);
    }

    #[test]
    fn test_parse_id_minted_under_another_prefix() {
        assert_eq!(parse_master_id("MMK-1.029.2", "DMM-"), Some((1, 29, 2)));
        assert_eq!(parse_master_id("MMK-12.005.3", "DMM"), Some((12, 5, 3)));
    }

    #[test]
    fn test_sections_follow_reference_order() {
        let entries = vec![
            Entry::new("berendes:1.10", "berendes", "1.10"),
            Entry::new("berendes:1.2", "berendes", "1.2"),
            Entry::new("berendes:1.2.1", "berendes", "1.2.1"),
            Entry::new("berendes:2.1", "berendes", "2.1"),
        ];
        let assignment = run(&entries, &[], None);

        assert_eq!(
            ids(&assignment),
            vec![
                ("berendes:1.2", "MMK-1.002.1"),
                ("berendes:1.2.1", "MMK-1.002.2"),
                ("berendes:1.10", "MMK-1.010.1"),
                ("berendes:2.1", "MMK-2.001.1"),
            ]
        );
        assert_eq!(assignment.minted, 4);
        assert_eq!(assignment.registry.records.len(), 4);
    }

    #[test]
    fn test_segments_order_within_chapter() {
        let entries = vec![
            seg("berendes:1.29:seg2", "1.29", "seg2"),
            seg("berendes:1.29:seg10", "1.29", "seg10"),
            seg("berendes:1.29:seg1", "1.29", "seg1"),
        ];
        let assignment = run(&entries, &[], None);

        assert_eq!(
            ids(&assignment),
            vec![
                ("berendes:1.29:seg1", "MMK-1.029.1"),
                ("berendes:1.29:seg2", "MMK-1.029.2"),
                ("berendes:1.29:seg10", "MMK-1.029.3"),
            ]
        );
    }

    #[test]
    fn test_frozen_ids_survive_insertion() {
        let first = vec![
            seg("berendes:1.29:seg1", "1.29", "seg1"),
            seg("berendes:1.29:seg3", "1.29", "seg3"),
        ];
        let frozen = run(&first, &[], None).registry;

        let mut second = first.clone();
        second.push(seg("berendes:1.29:seg2", "1.29", "seg2"));

        let unfrozen = run(&second, &[], None);
        assert_eq!(
            unfrozen.units[2].master_id, "MMK-1.029.3",
            "without a registry sections shift"
        );

        let assignment = run(&second, &[], Some(&frozen));
        assert_eq!(
            ids(&assignment),
            vec![
                ("berendes:1.29:seg1", "MMK-1.029.1"),
                ("berendes:1.29:seg2", "MMK-1.029.3"),
                ("berendes:1.29:seg3", "MMK-1.029.2"),
            ]
        );
        assert_eq!(assignment.reused, 2);
        assert_eq!(assignment.minted, 1);
        assert_eq!(assignment.deprecated, 0);
    }

    #[test]
    fn test_grown_unit_keeps_id() {
        let first = vec![Entry::new("beck:1.29", "beck", "1.29")];
        let frozen = run(&first, &[], None).registry;

        let second = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("wellmann:1.29", "wellmann", "1.29"),
        ];
        let edges = vec![AlignmentEdge::equivalent("beck:1.29", "wellmann:1.29")];
        let assignment = run(&second, &edges, Some(&frozen));

        assert_eq!(assignment.units.len(), 1);
        assert_eq!(assignment.units[0].master_id, "MMK-1.029.1");
        assert_eq!(assignment.units[0].anchor_entry_id, "wellmann:1.29");
        assert_eq!(assignment.registry.records[0].members.len(), 2);
    }

    #[test]
    fn test_kept_id_outside_anchor_bucket() {
        let first = vec![Entry::new("beck:1.29", "beck", "1.29")];
        let frozen = run(&first, &[], None).registry;

        // The unit now anchors on a wellmann entry in book 2
        let second = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("wellmann:2.5", "wellmann", "2.5"),
            Entry::new("berendes:2.5", "berendes", "2.5"),
        ];
        let edges = vec![AlignmentEdge::equivalent("beck:1.29", "wellmann:2.5")];
        let assignment = run(&second, &edges, Some(&frozen));

        let rows: Vec<(&str, u32, u32, u32)> = assignment
            .units
            .iter()
            .map(|u| (u.master_id.as_str(), u.book, u.chapter, u.section))
            .collect();
        assert_eq!(rows, vec![("MMK-2.005.1", 2, 5, 1), ("MMK-1.029.1", 1, 29, 1)]);
        assert_eq!(assignment.reviews.len(), 1);
        assert_eq!(assignment.reviews[0].kind, AnomalyKind::IdBucketMismatch);
        assert_eq!(assignment.reviews[0].subject_ids, vec!["MMK-1.029.1", "wellmann:2.5"]);
    }

    #[test]
    fn test_kept_id_under_previous_prefix() {
        let first = vec![Entry::new("beck:1.29", "beck", "1.29")];
        let frozen = run(&first, &[], None).registry;

        let second = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("berendes:1.29", "berendes", "1.29"),
        ];
        let params = ConcordanceParams {
            id_prefix: "DMM-".to_string(),
            ..Default::default()
        };
        let assignment = run_with(&second, &[], Some(&frozen), &params);

        let rows: Vec<(&str, u32, u32, u32)> = assignment
            .units
            .iter()
            .map(|u| (u.master_id.as_str(), u.book, u.chapter, u.section))
            .collect();
        // Section 1 of 1.29 is still held by the old id
        assert_eq!(rows, vec![("MMK-1.029.1", 1, 29, 1), ("DMM-1.029.2", 1, 29, 2)]);
        assert!(assignment.reviews.is_empty());
    }

    #[test]
    fn test_split_deprecates_with_links() {
        let first = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("wellmann:1.29", "wellmann", "1.29"),
        ];
        let edges = vec![AlignmentEdge::equivalent("beck:1.29", "wellmann:1.29")];
        let frozen = run(&first, &edges, None).registry;
        assert_eq!(frozen.records.len(), 1);

        // Equivalence withdrawn: the unit splits in two
        let assignment = run(&first, &[], Some(&frozen));

        assert_eq!(assignment.units.len(), 2);
        assert_eq!(assignment.deprecated, 1);
        let new_ids: Vec<&str> = assignment.units.iter().map(|u| u.master_id.as_str()).collect();
        assert_eq!(new_ids, vec!["MMK-1.029.2", "MMK-1.029.3"]);

        let tombstone = assignment.registry.get("MMK-1.029.1").unwrap();
        assert_eq!(tombstone.status, IdStatus::Deprecated);
        assert_eq!(tombstone.replaced_by, vec!["MMK-1.029.2", "MMK-1.029.3"]);
        for unit in &assignment.units {
            let record = assignment.registry.get(&unit.master_id).unwrap();
            assert_eq!(record.replaces, vec!["MMK-1.029.1"]);
        }
    }

    #[test]
    fn test_merge_deprecates_both() {
        let entries = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("wellmann:1.29", "wellmann", "1.29"),
        ];
        let frozen = run(&entries, &[], None).registry;
        let edges = vec![AlignmentEdge::equivalent("beck:1.29", "wellmann:1.29")];

        let assignment = run(&entries, &edges, Some(&frozen));

        assert_eq!(assignment.units.len(), 1);
        assert_eq!(assignment.units[0].master_id, "MMK-1.029.3");
        assert_eq!(assignment.deprecated, 2);
        let record = assignment.registry.get("MMK-1.029.3").unwrap();
        assert_eq!(record.replaces, vec!["MMK-1.029.1", "MMK-1.029.2"]);
    }

    #[test]
    fn test_vanished_unit_becomes_tombstone() {
        let first = vec![
            Entry::new("beck:1.29", "beck", "1.29"),
            Entry::new("beck:1.30", "beck", "1.30"),
        ];
        let frozen = run(&first, &[], None).registry;

        let second = vec![Entry::new("beck:1.29", "beck", "1.29")];
        let assignment = run(&second, &[], Some(&frozen));

        assert_eq!(assignment.units.len(), 1);
        let tombstone = assignment.registry.get("MMK-1.030.1").unwrap();
        assert_eq!(tombstone.status, IdStatus::Deprecated);
        assert!(tombstone.replaced_by.is_empty());

        // Third run: the tombstone is carried forward and its id never reused
        let third = run(&first, &[], Some(&assignment.registry));
        assert_eq!(third.units[1].master_id, "MMK-1.030.2");
        assert_eq!(
            third.registry.get("MMK-1.030.1").map(|r| r.status),
            Some(IdStatus::Deprecated)
        );
    }

    #[test]
    fn test_overlapping_active_records_rejected() {
        let record = |id: &str| IdRecord {
            master_id: id.to_string(),
            status: IdStatus::Active,
            anchor_entry_id: "beck:1.29".to_string(),
            members: vec!["beck:1.29".to_string()],
            replaces: vec![],
            replaced_by: vec![],
        };
        let registry = IdRegistry {
            records: vec![record("MMK-1.029.1"), record("MMK-1.029.2")],
        };
        let entries = vec![Entry::new("beck:1.29", "beck", "1.29")];
        let components = cluster_equivalents(&entries, &[], &mut ReviewLog::new()).unwrap();
        let index = index_entries(&entries);
        let params = ConcordanceParams::default();
        let units: Vec<_> = components.components().cloned().collect();
        let (anchors, _) = select_anchors(&units, &components, &index, &params);

        let result = assign_ids(&anchors, &components, &index, Some(&registry), &params);
        assert!(matches!(
            result,
            Err(SchemaError::MalformedRegistryRecord { .. })
        ));
    }
}
