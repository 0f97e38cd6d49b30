//! Master-Unit Concordance Library
//!
//! Aligns textual references across the historical editions of Dioscorides,
//! *De materia medica*, into stable edition-agnostic master units and projects
//! per-edition coverage of every unit into a reviewable table.
//!
//! Entries joined by `equivalent` edges are clustered into components,
//! `contains` / `part_of` edges become a containment graph between components,
//! cycles are broken deterministically, and the leaf components become master
//! units with permanent ids.
//!
//! # Example
//!
//! ```no_run
//! use dmm_concordance::prelude::*;
//! use std::path::Path;
//!
//! let (entries, edges) = load_input(Path::new("dmm.db")).unwrap();
//! let params = ConcordanceParams::default();
//!
//! let result = build_concordance(&entries, &edges, None, &params, false).unwrap();
//!
//! println!("{} master units", result.units.len());
//! write_all(&result, Path::new("out"), true).unwrap();
//! ```
//!
//! # Rerunning against a frozen registry
//!
//! ```no_run
//! use dmm_concordance::prelude::*;
//! use std::path::Path;
//!
//! let (entries, edges) = load_input(Path::new("dmm.db")).unwrap();
//! let registry = load_registry(Path::new("out/master_registry.json")).unwrap();
//!
//! // Published ids are kept; splits and merges get new ids with tombstones
//! let result = build_concordance(
//!     &entries,
//!     &edges,
//!     Some(&registry),
//!     &ConcordanceParams::default(),
//!     false,
//! )
//! .unwrap();
//! println!("{} ids reused", result.summary.reused_ids);
//! ```

pub mod anchor;
pub mod cluster;
pub mod coverage;
pub mod cycles;
pub mod db;
pub mod graph;
pub mod ids;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod review;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::anchor::{granularity_score, parse_book_chapter, select_anchor, select_anchors};
    pub use crate::cluster::{cluster_equivalents, ComponentMap, DisjointSet};
    pub use crate::coverage::{membership_rows, resolve_coverage, EditionIndex};
    pub use crate::cycles::{atomic_components, break_cycles, break_cycles_by_region, is_acyclic};
    pub use crate::db::{
        load_alignments, load_entries, load_input, load_input_from_excel, load_input_stats,
        load_registry, DbError,
    };
    pub use crate::graph::{build_containment_graph, ContainmentEdge, ContainmentGraph};
    pub use crate::ids::{assign_ids, mint_id, IdAssignment};
    pub use crate::models::{
        AlignmentEdge, AlignmentType, Anchor, AnomalyKind, ComponentId, ConcordanceParams,
        ConcordanceResult, ConcordanceSummary, Confidence, CoverageRecord, Entry, IdRecord,
        IdRegistry, IdStatus, InputStats, MasterUnit, MatchType, MembershipRow, ReviewRecord,
        SchemaError,
    };
    pub use crate::output::{
        print_summary, print_units, write_all, write_coverage_csv, write_json,
        write_membership_csv, write_registry, write_review_csv, write_units_csv, OutputError,
    };
    pub use crate::pipeline::{
        build_concordance, build_concordance_from_db, synthetic_corpus, validate_input,
        ConcordanceError,
    };
    pub use crate::review::ReviewLog;
}

// Re-export commonly used types at the crate root
pub use models::{
    AlignmentEdge, ConcordanceParams, ConcordanceResult, Entry, IdRegistry, MasterUnit,
};
pub use pipeline::build_concordance;
