//! Input loading: SQLite `dmm.db`, xlsx workbooks and frozen id registries.

use crate::models::{
    AlignmentEdge, AlignmentType, Confidence, Entry, IdRegistry, InputStats, SchemaError,
};
use calamine::{open_workbook, Reader, Xlsx};
use rusqlite::{Connection, Result};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Excel error: {0}")]
    Excel(#[from] calamine::Error),
    #[error("Excel XLSX error: {0}")]
    ExcelXlsx(#[from] calamine::XlsxError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),
}

/// Text column that may be NULL; NULL reads as empty.
fn text(row: &rusqlite::Row<'_>, idx: usize) -> Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

/// Segment column: NULL and blank both mean "whole chapter".
fn segment(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Load all rows of the `entries` table, ordered by id.
pub fn load_entries(db_path: &Path) -> Result<Vec<Entry>, DbError> {
    let conn = Connection::open(db_path)?;

    let mut stmt = conn.prepare(
        "SELECT id, edition_id, ref, segment, term, term_greek, term_latin,
                page, div_id, seg_id, url, notes
         FROM entries
         ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(Entry {
            id: text(row, 0)?,
            edition_id: text(row, 1)?,
            ref_label: text(row, 2)?,
            segment: segment(text(row, 3)?),
            term: text(row, 4)?,
            term_greek: text(row, 5)?,
            term_latin: text(row, 6)?,
            page: text(row, 7)?,
            div_id: text(row, 8)?,
            seg_id: text(row, 9)?,
            url: text(row, 10)?,
            notes: text(row, 11)?,
        });
    }

    Ok(entries)
}

/// Parse the type and confidence columns of one alignment row.
///
/// A blank confidence reads as `certain`, the level the migration scripts
/// write for edition-derived alignments.
fn parse_alignment(
    row: usize,
    entry_a: String,
    entry_b: String,
    alignment_type: &str,
    confidence: &str,
    notes: String,
) -> Result<AlignmentEdge, SchemaError> {
    if alignment_type.trim().is_empty() {
        return Err(SchemaError::MissingAlignmentField {
            row,
            field: "alignment_type",
        });
    }
    let alignment_type: AlignmentType = alignment_type.parse()?;
    let confidence = if confidence.trim().is_empty() {
        Confidence::Certain
    } else {
        confidence.parse()?
    };
    Ok(AlignmentEdge {
        entry_a,
        entry_b,
        alignment_type,
        confidence,
        notes,
    })
}

/// Load all rows of the `alignments` table in insertion order.
pub fn load_alignments(db_path: &Path) -> Result<Vec<AlignmentEdge>, DbError> {
    let conn = Connection::open(db_path)?;

    let mut stmt = conn.prepare(
        "SELECT entry_a, entry_b, alignment_type, confidence, notes
         FROM alignments
         ORDER BY rowid",
    )?;
    let mut rows = stmt.query([])?;

    let mut edges = Vec::new();
    let mut idx = 0;
    while let Some(row) = rows.next()? {
        edges.push(parse_alignment(
            idx,
            text(row, 0)?,
            text(row, 1)?,
            &text(row, 2)?,
            &text(row, 3)?,
            text(row, 4)?,
        )?);
        idx += 1;
    }

    Ok(edges)
}

/// Load entries and alignments from one database.
pub fn load_input(db_path: &Path) -> Result<(Vec<Entry>, Vec<AlignmentEdge>), DbError> {
    let entries = load_entries(db_path)?;
    let edges = load_alignments(db_path)?;
    tracing::debug!(
        path = %db_path.display(),
        entries = entries.len(),
        alignments = edges.len(),
        "loaded input"
    );
    Ok((entries, edges))
}

/// Count entries per edition and alignments per type.
pub fn load_input_stats(db_path: &Path) -> Result<InputStats, DbError> {
    let conn = Connection::open(db_path)?;
    let mut stats = InputStats::default();

    let mut stmt = conn.prepare(
        "SELECT COALESCE(edition_id, ''), COUNT(*) FROM entries GROUP BY edition_id",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let count: i64 = row.get(1)?;
        stats.entries_per_edition.insert(row.get(0)?, count as usize);
    }

    let mut stmt = conn.prepare(
        "SELECT COALESCE(alignment_type, ''), COUNT(*) FROM alignments GROUP BY alignment_type",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let count: i64 = row.get(1)?;
        stats.alignments_per_type.insert(row.get(0)?, count as usize);
    }

    stats.entry_count = stats.entries_per_edition.values().sum();
    stats.alignment_count = stats.alignments_per_type.values().sum();

    Ok(stats)
}

/// Load a frozen id registry from JSON and validate it.
pub fn load_registry(path: &Path) -> Result<IdRegistry, DbError> {
    let content = std::fs::read_to_string(path)?;
    let registry: IdRegistry = serde_json::from_str(&content)?;
    registry.validate()?;
    tracing::debug!(
        path = %path.display(),
        records = registry.records.len(),
        "loaded id registry"
    );
    Ok(registry)
}

/// Load entries and alignments from the `entries` and `alignments` sheets of
/// an xlsx workbook. Columns are located by header name, case-insensitively.
pub fn load_input_from_excel(
    excel_path: &Path,
) -> Result<(Vec<Entry>, Vec<AlignmentEdge>), DbError> {
    let mut workbook: Xlsx<_> = open_workbook(excel_path)?;

    let sheet = find_sheet(&workbook, "entries")?;
    let entry_range = workbook.worksheet_range(&sheet)?;
    let mut rows = entry_range.rows();
    let columns = rows.next().map(find_column_indices).unwrap_or_default();

    let mut entries = Vec::new();
    for row in rows {
        // Skip rows left blank at the bottom of a sheet
        if is_blank_row(row) {
            continue;
        }
        let cell = |name: &str| get_string_cell(row, columns.get(name));
        entries.push(Entry {
            id: cell("id"),
            edition_id: cell("edition_id"),
            ref_label: cell("ref"),
            segment: segment(cell("segment")),
            term: cell("term"),
            term_greek: cell("term_greek"),
            term_latin: cell("term_latin"),
            page: cell("page"),
            div_id: cell("div_id"),
            seg_id: cell("seg_id"),
            url: cell("url"),
            notes: cell("notes"),
        });
    }

    let sheet = find_sheet(&workbook, "alignments")?;
    let alignment_range = workbook.worksheet_range(&sheet)?;
    let mut rows = alignment_range.rows();
    let columns = rows.next().map(find_column_indices).unwrap_or_default();

    let mut edges = Vec::new();
    for (idx, row) in rows.enumerate() {
        if is_blank_row(row) {
            continue;
        }
        let cell = |name: &str| get_string_cell(row, columns.get(name));
        edges.push(parse_alignment(
            idx,
            cell("entry_a"),
            cell("entry_b"),
            &cell("alignment_type"),
            &cell("confidence"),
            cell("notes"),
        )?);
    }

    Ok((entries, edges))
}

fn find_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &Xlsx<R>,
    name: &str,
) -> Result<String, DbError> {
    workbook
        .sheet_names()
        .iter()
        .find(|s| s.trim().eq_ignore_ascii_case(name))
        .cloned()
        .ok_or_else(|| DbError::SheetNotFound(name.to_string()))
}

/// Header name (lowercased) -> column index
#[derive(Debug, Default)]
struct ColumnIndices {
    names: Vec<(String, usize)>,
}

impl ColumnIndices {
    fn get(&self, name: &str) -> Option<usize> {
        self.names.iter().find(|(n, _)| n == name).map(|(_, i)| *i)
    }
}

fn find_column_indices(header: &[calamine::Data]) -> ColumnIndices {
    let mut indices = ColumnIndices::default();
    for (i, cell) in header.iter().enumerate() {
        if let calamine::Data::String(s) = cell {
            let name = match s.trim().to_lowercase().as_str() {
                "entry_id" => "id".to_string(),
                "edition" => "edition_id".to_string(),
                other => other.to_string(),
            };
            indices.names.push((name, i));
        }
    }
    indices
}

fn is_blank_row(row: &[calamine::Data]) -> bool {
    row.iter().all(|cell| match cell {
        calamine::Data::Empty => true,
        calamine::Data::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

fn get_string_cell(row: &[calamine::Data], col: Option<usize>) -> String {
    col.and_then(|i| row.get(i))
        .and_then(|cell| match cell {
            calamine::Data::String(s) => Some(s.trim().to_string()),
            calamine::Data::Int(n) => Some(n.to_string()),
            calamine::Data::Float(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
