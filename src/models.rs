//! Data structures for the master concordance pipeline.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Malformed or missing required input. Always fatal for a run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entry row {row}: missing required field `{field}`")]
    MissingEntryField { row: usize, field: &'static str },
    #[error("duplicate entry id: {0}")]
    DuplicateEntry(String),
    #[error("alignment row {row}: missing required field `{field}`")]
    MissingAlignmentField { row: usize, field: &'static str },
    #[error("unknown alignment type: {0:?}")]
    UnknownAlignmentType(String),
    #[error("unknown confidence level: {0:?}")]
    UnknownConfidence(String),
    #[error("unknown registry status: {0:?}")]
    UnknownStatus(String),
    #[error("duplicate master id in registry: {0}")]
    DuplicateMasterId(String),
    #[error("registry record {master_id}: {reason}")]
    MalformedRegistryRecord { master_id: String, reason: String },
}

/// A textual reference in one edition at one printed location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub edition_id: String,
    #[serde(rename = "ref")]
    pub ref_label: String,
    /// Sub-unit segment ("seg1", "seg2"); None for a whole chapter
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub term_greek: String,
    #[serde(default)]
    pub term_latin: String,
    #[serde(default)]
    pub page: String,
    #[serde(default)]
    pub div_id: String,
    #[serde(default)]
    pub seg_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub notes: String,
}

impl Entry {
    pub fn new(id: &str, edition_id: &str, ref_label: &str) -> Self {
        Self {
            id: id.to_string(),
            edition_id: edition_id.to_string(),
            ref_label: ref_label.to_string(),
            ..Default::default()
        }
    }

    pub fn with_segment(mut self, segment: &str) -> Self {
        self.segment = Some(segment.to_string());
        self
    }

    pub fn with_term(mut self, term: &str) -> Self {
        self.term = term.to_string();
        self
    }

    pub fn with_page(mut self, page: &str) -> Self {
        self.page = page.to_string();
        self
    }

    /// Segment label, ignoring blank values.
    pub fn segment_label(&self) -> Option<&str> {
        self.segment
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// TEI anchor pointer: `div_id`, `div_id#seg_id`, or the external url as a last resort.
    pub fn anchor_pointer(&self) -> String {
        match (self.div_id.is_empty(), self.seg_id.is_empty()) {
            (false, false) => format!("{}#{}", self.div_id, self.seg_id),
            (false, true) => self.div_id.clone(),
            (true, false) => format!("#{}", self.seg_id),
            (true, true) => self.url.clone(),
        }
    }

    /// Term used for display, falling back to the Greek and Latin forms.
    pub fn display_term(&self) -> &str {
        [&self.term, &self.term_greek, &self.term_latin]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

/// Entries keyed by id.
pub type EntryIndex<'a> = HashMap<&'a str, &'a Entry>;

pub fn index_entries(entries: &[Entry]) -> EntryIndex<'_> {
    entries.iter().map(|e| (e.id.as_str(), e)).collect()
}

/// Relation type carried by an alignment edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentType {
    Equivalent,
    /// entry_a contains entry_b (coarse -> fine)
    Contains,
    /// entry_a is part of entry_b
    PartOf,
    /// Non-structural; ignored by the graph stages
    Related,
}

impl AlignmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentType::Equivalent => "equivalent",
            AlignmentType::Contains => "contains",
            AlignmentType::PartOf => "part_of",
            AlignmentType::Related => "related",
        }
    }

    /// Whether this type feeds the containment graph.
    pub fn is_containment(&self) -> bool {
        matches!(self, AlignmentType::Contains | AlignmentType::PartOf)
    }
}

impl FromStr for AlignmentType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equivalent" => Ok(AlignmentType::Equivalent),
            "contains" => Ok(AlignmentType::Contains),
            "part_of" => Ok(AlignmentType::PartOf),
            "related" => Ok(AlignmentType::Related),
            _ => Err(SchemaError::UnknownAlignmentType(s.to_string())),
        }
    }
}

impl fmt::Display for AlignmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence of an alignment. Ordered: uncertain < probable < certain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Uncertain,
    Probable,
    Certain,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Uncertain => "uncertain",
            Confidence::Probable => "probable",
            Confidence::Certain => "certain",
        }
    }
}

impl FromStr for Confidence {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "certain" => Ok(Confidence::Certain),
            "probable" => Ok(Confidence::Probable),
            "uncertain" => Ok(Confidence::Uncertain),
            _ => Err(SchemaError::UnknownConfidence(s.to_string())),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed relation between two entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentEdge {
    pub entry_a: String,
    pub entry_b: String,
    pub alignment_type: AlignmentType,
    pub confidence: Confidence,
    #[serde(default)]
    pub notes: String,
}

impl AlignmentEdge {
    pub fn new(
        entry_a: &str,
        entry_b: &str,
        alignment_type: AlignmentType,
        confidence: Confidence,
    ) -> Self {
        Self {
            entry_a: entry_a.to_string(),
            entry_b: entry_b.to_string(),
            alignment_type,
            confidence,
            notes: String::new(),
        }
    }

    pub fn equivalent(entry_a: &str, entry_b: &str) -> Self {
        Self::new(entry_a, entry_b, AlignmentType::Equivalent, Confidence::Certain)
    }

    pub fn contains(coarse: &str, fine: &str, confidence: Confidence) -> Self {
        Self::new(coarse, fine, AlignmentType::Contains, confidence)
    }

    pub fn part_of(fine: &str, coarse: &str, confidence: Confidence) -> Self {
        Self::new(fine, coarse, AlignmentType::PartOf, confidence)
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    /// Normalize a containment edge to (coarse, fine). None for non-containment types.
    pub fn as_containment(&self) -> Option<(&str, &str)> {
        match self.alignment_type {
            AlignmentType::Contains => Some((&self.entry_a, &self.entry_b)),
            AlignmentType::PartOf => Some((&self.entry_b, &self.entry_a)),
            _ => None,
        }
    }
}

/// Identity of an equivalence component: its lexicographically smallest member entry id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of structural anomaly recorded for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    CycleBroken,
    UnparsableRef,
    ReferenceError,
    TieUnresolved,
    /// Containment edge whose ends collapsed into one component
    SelfContainment,
    /// Frozen id kept by a unit whose anchor now falls in another bucket
    IdBucketMismatch,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CycleBroken => "cycle_broken",
            AnomalyKind::UnparsableRef => "unparsable_ref",
            AnomalyKind::ReferenceError => "reference_error",
            AnomalyKind::TieUnresolved => "tie_unresolved",
            AnomalyKind::SelfContainment => "self_containment",
            AnomalyKind::IdBucketMismatch => "id_bucket_mismatch",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the review table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub kind: AnomalyKind,
    /// Affected component, unit or entry ids
    pub subject_ids: Vec<String>,
    pub detail: String,
}

impl ReviewRecord {
    pub fn new(kind: AnomalyKind, subject_ids: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            subject_ids,
            detail: detail.into(),
        }
    }
}

/// One `.`-separated part of a printed reference label.
///
/// Numeric parts sort before textual ones, so `1.2` < `1.10` < `1.a`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RefPart {
    Num(u32),
    Text(String),
}

/// The representative entry of a master unit plus its ordering metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub component: ComponentId,
    pub entry_id: String,
    pub granularity: u32,
    pub book: u32,
    pub chapter: u32,
    /// False when (book, chapter) is the (0, 0) sentinel
    pub parsed: bool,
    pub ref_parts: Vec<RefPart>,
    pub segment_ordinal: u32,
}

/// A master unit with its permanent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterUnit {
    pub master_id: String,
    pub book: u32,
    pub chapter: u32,
    pub section: u32,
    pub anchor_entry_id: String,
    pub label: String,
    pub component: ComponentId,
    /// Member entry ids, sorted
    pub members: Vec<String>,
}

/// Coverage status of one (master unit, edition) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    FallbackContains,
    Missing,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::FallbackContains => "fallback_contains",
            MatchType::Missing => "missing",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (master unit, edition) cell of the coverage projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub master_id: String,
    pub edition_id: String,
    pub match_type: MatchType,
    /// Resolved entry; None when missing
    pub entry: Option<Entry>,
    /// Containment-graph hops to the resolved entry (0 for exact)
    pub distance: u32,
    pub notes: String,
}

/// One row of the master-unit membership table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipRow {
    pub master_id: String,
    pub entry_id: String,
    /// `exact` or `fallback_contains`
    pub relationship_hint: MatchType,
}

/// Lifecycle of a published identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStatus {
    Active,
    Deprecated,
}

impl IdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdStatus::Active => "active",
            IdStatus::Deprecated => "deprecated",
        }
    }
}

impl FromStr for IdStatus {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(IdStatus::Active),
            "deprecated" => Ok(IdStatus::Deprecated),
            _ => Err(SchemaError::UnknownStatus(s.to_string())),
        }
    }
}

/// A published identifier. Deprecated records are tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRecord {
    pub master_id: String,
    pub status: IdStatus,
    pub anchor_entry_id: String,
    /// Member entry ids at the time the record was written, sorted
    pub members: Vec<String>,
    #[serde(default)]
    pub replaces: Vec<String>,
    #[serde(default)]
    pub replaced_by: Vec<String>,
}

/// A frozen snapshot of published identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRegistry {
    pub records: Vec<IdRecord>,
}

impl IdRegistry {
    /// Reject duplicate ids and records without members or anchor.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for record in &self.records {
            if record.master_id.trim().is_empty() {
                return Err(SchemaError::MalformedRegistryRecord {
                    master_id: String::new(),
                    reason: "empty master_id".to_string(),
                });
            }
            if !seen.insert(record.master_id.as_str()) {
                return Err(SchemaError::DuplicateMasterId(record.master_id.clone()));
            }
            if record.status == IdStatus::Active && record.members.is_empty() {
                return Err(SchemaError::MalformedRegistryRecord {
                    master_id: record.master_id.clone(),
                    reason: "active record has no members".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, master_id: &str) -> Option<&IdRecord> {
        self.records.iter().find(|r| r.master_id == master_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &IdRecord> {
        self.records.iter().filter(|r| r.status == IdStatus::Active)
    }

    pub fn deprecated(&self) -> impl Iterator<Item = &IdRecord> {
        self.records
            .iter()
            .filter(|r| r.status == IdStatus::Deprecated)
    }
}

/// Pipeline parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcordanceParams {
    /// Fixed prefix of every master id
    pub id_prefix: String,
    /// Zero-padding width of the chapter number in master ids
    pub chapter_width: usize,
    /// Anchor tie-break order; earlier editions win
    pub edition_priority: Vec<String>,
    /// Upper bound on fallback search depth (None = unbounded)
    pub max_fallback_distance: Option<u32>,
}

impl Default for ConcordanceParams {
    fn default() -> Self {
        Self {
            id_prefix: "MMK-".to_string(),
            chapter_width: 3,
            edition_priority: [
                "wellmann",
                "sprengel",
                "berendes",
                "beck",
                "gunther",
                "laguna",
                "barbaro",
                "lusitanus",
                "monardes",
                "matthioli",
                "desmoulins",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_fallback_distance: None,
        }
    }
}

impl ConcordanceParams {
    /// Position in the priority list; unlisted editions share the last rank.
    pub fn edition_rank(&self, edition_id: &str) -> usize {
        self.edition_priority
            .iter()
            .position(|e| e == edition_id)
            .unwrap_or(self.edition_priority.len())
    }
}

/// Summary statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcordanceSummary {
    pub entry_count: usize,
    pub alignment_count: usize,
    pub component_count: usize,
    pub containment_edge_count: usize,
    pub cycles_broken: usize,
    pub master_unit_count: usize,
    pub minted_ids: usize,
    pub reused_ids: usize,
    pub deprecated_ids: usize,
    pub exact_cells: usize,
    pub fallback_cells: usize,
    pub missing_cells: usize,
    pub review_count: usize,
}

/// Complete output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcordanceResult {
    pub version: String,
    pub parameters: ConcordanceParams,
    pub summary: ConcordanceSummary,
    /// Coverage column order
    pub editions: Vec<String>,
    pub units: Vec<MasterUnit>,
    pub membership: Vec<MembershipRow>,
    /// Unit-major, edition-minor, in `units` x `editions` order
    pub coverage: Vec<CoverageRecord>,
    pub reviews: Vec<ReviewRecord>,
    /// Next frozen snapshot
    pub registry: IdRegistry,
}

impl ConcordanceResult {
    /// Coverage cells of one unit, in edition order.
    pub fn coverage_row(&self, unit_idx: usize) -> &[CoverageRecord] {
        let width = self.editions.len();
        &self.coverage[unit_idx * width..(unit_idx + 1) * width]
    }

    pub fn unit(&self, master_id: &str) -> Option<&MasterUnit> {
        self.units.iter().find(|u| u.master_id == master_id)
    }
}

/// Input table statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputStats {
    pub entry_count: usize,
    pub alignment_count: usize,
    pub entries_per_edition: BTreeMap<String, usize>,
    pub alignments_per_type: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_order() {
        assert!(Confidence::Uncertain < Confidence::Probable);
        assert!(Confidence::Probable < Confidence::Certain);
        assert_eq!(
            [Confidence::Probable, Confidence::Certain, Confidence::Uncertain]
                .into_iter()
                .max(),
            Some(Confidence::Certain)
        );
    }

    #[test]
    fn test_parse_alignment_type() {
        assert_eq!("contains".parse::<AlignmentType>(), Ok(AlignmentType::Contains));
        assert_eq!(" Part_Of ".parse::<AlignmentType>(), Ok(AlignmentType::PartOf));
        assert!(matches!(
            "overlaps".parse::<AlignmentType>(),
            Err(SchemaError::UnknownAlignmentType(_))
        ));
    }

    #[test]
    fn test_part_of_normalizes_to_contains() {
        let edge = AlignmentEdge::part_of("berendes:1.29", "beck:1.29", Confidence::Certain);
        assert_eq!(edge.as_containment(), Some(("beck:1.29", "berendes:1.29")));

        let edge = AlignmentEdge::equivalent("a", "b");
        assert_eq!(edge.as_containment(), None);
    }

    #[test]
    fn test_ref_part_order() {
        let mut parts = vec![
            RefPart::Text("a".to_string()),
            RefPart::Num(10),
            RefPart::Num(2),
        ];
        parts.sort();
        assert_eq!(
            parts,
            vec![RefPart::Num(2), RefPart::Num(10), RefPart::Text("a".to_string())]
        );
    }

    #[test]
    fn test_anchor_pointer() {
        let mut entry = Entry::new("laguna:1.1", "laguna", "1.1");
        assert_eq!(entry.anchor_pointer(), "");
        entry.div_id = "div-13".to_string();
        assert_eq!(entry.anchor_pointer(), "div-13");
        entry.seg_id = "seg-2".to_string();
        assert_eq!(entry.anchor_pointer(), "div-13#seg-2");
    }

    #[test]
    fn test_blank_segment_is_absent() {
        let entry = Entry::new("a", "ed", "1.1").with_segment("  ");
        assert_eq!(entry.segment_label(), None);
    }

    #[test]
    fn test_edition_rank() {
        let params = ConcordanceParams {
            edition_priority: vec!["beck".to_string(), "berendes".to_string()],
            ..Default::default()
        };
        assert_eq!(params.edition_rank("beck"), 0);
        assert_eq!(params.edition_rank("berendes"), 1);
        assert_eq!(params.edition_rank("gunther"), 2);
        assert_eq!(params.edition_rank("laguna"), 2);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let record = IdRecord {
            master_id: "MMK-1.001.1".to_string(),
            status: IdStatus::Active,
            anchor_entry_id: "a".to_string(),
            members: vec!["a".to_string()],
            replaces: vec![],
            replaced_by: vec![],
        };
        let registry = IdRegistry {
            records: vec![record.clone(), record],
        };
        assert_eq!(
            registry.validate(),
            Err(SchemaError::DuplicateMasterId("MMK-1.001.1".to_string()))
        );
    }
}
