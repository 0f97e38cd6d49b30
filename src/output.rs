//! Output formatting for concordance results (CSV tables, JSON, summaries).

use crate::models::{
    ConcordanceResult, CoverageRecord, IdRegistry, MasterUnit, MatchType, MembershipRow,
    ReviewRecord,
};
use std::borrow::Cow;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub const UNITS_FILE: &str = "master_units.csv";
pub const MEMBERSHIP_FILE: &str = "master_membership.csv";
pub const REVIEW_FILE: &str = "review.csv";
pub const COVERAGE_FILE: &str = "coverage_wide.csv";
pub const RESULT_FILE: &str = "concordance.json";
pub const REGISTRY_FILE: &str = "master_registry.json";

/// Per-edition columns of the wide coverage table.
const COVERAGE_COLUMNS: [&str; 8] = [
    "entry_id",
    "ref",
    "segment",
    "term",
    "page",
    "anchor",
    "match_type",
    "notes",
];

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Write master units as CSV.
pub fn write_units_csv<W: Write>(units: &[MasterUnit], writer: &mut W) -> Result<(), OutputError> {
    writeln!(writer, "master_id,book,chapter,section,anchor_entry_id,label")?;

    for unit in units {
        writeln!(
            writer,
            "{},{},{},{},{},{}",
            csv_field(&unit.master_id),
            unit.book,
            unit.chapter,
            unit.section,
            csv_field(&unit.anchor_entry_id),
            csv_field(&unit.label)
        )?;
    }

    Ok(())
}

/// Write the membership table as CSV.
pub fn write_membership_csv<W: Write>(
    rows: &[MembershipRow],
    writer: &mut W,
) -> Result<(), OutputError> {
    writeln!(writer, "master_id,entry_id,relationship_hint")?;

    for row in rows {
        writeln!(
            writer,
            "{},{},{}",
            csv_field(&row.master_id),
            csv_field(&row.entry_id),
            row.relationship_hint
        )?;
    }

    Ok(())
}

/// Write review records as CSV. Subject ids are joined with `;`.
pub fn write_review_csv<W: Write>(
    records: &[ReviewRecord],
    writer: &mut W,
) -> Result<(), OutputError> {
    writeln!(writer, "anomaly_kind,subject_ids,detail")?;

    for record in records {
        writeln!(
            writer,
            "{},{},{}",
            record.kind,
            csv_field(&record.subject_ids.join(";")),
            csv_field(&record.detail)
        )?;
    }

    Ok(())
}

fn coverage_cells(record: &CoverageRecord) -> [String; 8] {
    match &record.entry {
        Some(entry) => [
            entry.id.clone(),
            entry.ref_label.clone(),
            entry.segment_label().unwrap_or("").to_string(),
            entry.display_term().to_string(),
            entry.page.clone(),
            entry.anchor_pointer(),
            record.match_type.to_string(),
            record.notes.clone(),
        ],
        None => [
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            MatchType::Missing.to_string(),
            record.notes.clone(),
        ],
    }
}

/// Write the wide coverage projection: one row per unit, one column group per edition.
pub fn write_coverage_csv<W: Write>(
    result: &ConcordanceResult,
    writer: &mut W,
) -> Result<(), OutputError> {
    let mut header = vec![
        "master_id".to_string(),
        "book".to_string(),
        "chapter".to_string(),
        "section".to_string(),
        "label".to_string(),
    ];
    for edition in &result.editions {
        header.extend(COVERAGE_COLUMNS.iter().map(|c| format!("{}_{}", edition, c)));
    }
    let header: Vec<Cow<'_, str>> = header.iter().map(|h| csv_field(h)).collect();
    writeln!(writer, "{}", header.join(","))?;

    for (idx, unit) in result.units.iter().enumerate() {
        let mut fields = vec![
            csv_field(&unit.master_id).into_owned(),
            unit.book.to_string(),
            unit.chapter.to_string(),
            unit.section.to_string(),
            csv_field(&unit.label).into_owned(),
        ];
        for record in result.coverage_row(idx) {
            fields.extend(
                coverage_cells(record)
                    .iter()
                    .map(|cell| csv_field(cell).into_owned()),
            );
        }
        writeln!(writer, "{}", fields.join(","))?;
    }

    Ok(())
}

/// Write the full result as JSON.
pub fn write_json<W: Write>(result: &ConcordanceResult, writer: &mut W) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(result)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}

/// Write an id registry as JSON.
pub fn write_registry<W: Write>(registry: &IdRegistry, writer: &mut W) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(registry)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}

fn write_file<F>(path: &Path, write: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut io::BufWriter<std::fs::File>) -> Result<(), OutputError>,
{
    let mut file = io::BufWriter::new(std::fs::File::create(path)?);
    write(&mut file)?;
    file.flush()?;
    Ok(())
}

/// Write all tables into `out_dir`; the registry snapshot only when `freeze` is set.
///
/// Returns the paths written, in a fixed order.
pub fn write_all(
    result: &ConcordanceResult,
    out_dir: &Path,
    freeze: bool,
) -> Result<Vec<PathBuf>, OutputError> {
    std::fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    let path = out_dir.join(UNITS_FILE);
    write_file(&path, |w| write_units_csv(&result.units, w))?;
    written.push(path);

    let path = out_dir.join(MEMBERSHIP_FILE);
    write_file(&path, |w| write_membership_csv(&result.membership, w))?;
    written.push(path);

    let path = out_dir.join(REVIEW_FILE);
    write_file(&path, |w| write_review_csv(&result.reviews, w))?;
    written.push(path);

    let path = out_dir.join(COVERAGE_FILE);
    write_file(&path, |w| write_coverage_csv(result, w))?;
    written.push(path);

    let path = out_dir.join(RESULT_FILE);
    write_file(&path, |w| write_json(result, w))?;
    written.push(path);

    if freeze {
        let path = out_dir.join(REGISTRY_FILE);
        write_file(&path, |w| write_registry(&result.registry, w))?;
        written.push(path);
    }

    for path in &written {
        tracing::debug!(path = %path.display(), "wrote output");
    }

    Ok(written)
}

/// Write a summary report to stdout.
pub fn print_summary(result: &ConcordanceResult) {
    let s = &result.summary;
    println!("\n=== Concordance Summary ===");
    println!("Version: {}", result.version);
    println!();
    println!("Parameters:");
    println!("  ID prefix: {}", result.parameters.id_prefix);
    println!("  Chapter width: {}", result.parameters.chapter_width);
    println!(
        "  Edition priority: {}",
        result.parameters.edition_priority.join(", ")
    );
    match result.parameters.max_fallback_distance {
        Some(d) => println!("  Max fallback distance: {}", d),
        None => println!("  Max fallback distance: unbounded"),
    }
    println!();
    println!("Input:");
    println!("  Entries: {}", s.entry_count);
    println!("  Alignments: {}", s.alignment_count);
    println!("  Editions: {}", result.editions.len());
    println!();
    println!("Results:");
    println!("  Equivalence components: {}", s.component_count);
    println!("  Containment edges: {}", s.containment_edge_count);
    println!("  Cycles broken: {}", s.cycles_broken);
    println!("  Master units: {}", s.master_unit_count);
    println!(
        "  IDs: {} minted, {} reused, {} deprecated",
        s.minted_ids, s.reused_ids, s.deprecated_ids
    );
    let cells = s.exact_cells + s.fallback_cells + s.missing_cells;
    if cells > 0 {
        let pct = |n: usize| n as f64 * 100.0 / cells as f64;
        println!(
            "  Coverage: {:.1}% exact, {:.1}% fallback, {:.1}% missing",
            pct(s.exact_cells),
            pct(s.fallback_cells),
            pct(s.missing_cells)
        );
    }
    println!("  Review records: {}", s.review_count);
}

/// Format a unit as a human-readable line.
pub fn format_unit(unit: &MasterUnit) -> String {
    format!(
        "{}  {:<24} anchor={} members={}",
        unit.master_id,
        unit.label,
        unit.anchor_entry_id,
        unit.members.len()
    )
}

/// Print units in a human-readable format.
pub fn print_units(units: &[MasterUnit], limit: Option<usize>) {
    let to_print = match limit {
        Some(n) => &units[..n.min(units.len())],
        None => units,
    };

    for unit in to_print {
        println!("{}", format_unit(unit));
    }

    if let Some(n) = limit {
        if units.len() > n {
            println!("... and {} more units", units.len() - n);
        }
    }
}
