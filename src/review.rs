//! Collection of review records emitted by the pipeline stages.
//!
//! Every recoverable anomaly goes through [`ReviewLog::push`], which logs it
//! as a structured `warn` event and keeps it for the review table.

use crate::models::{AnomalyKind, ReviewRecord};

#[derive(Debug, Default)]
pub struct ReviewLog {
    records: Vec<ReviewRecord>,
}

impl ReviewLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ReviewRecord) {
        tracing::warn!(
            kind = %record.kind,
            subjects = ?record.subject_ids,
            "{}",
            record.detail
        );
        self.records.push(record);
    }

    pub fn record(
        &mut self,
        kind: AnomalyKind,
        subject_ids: Vec<String>,
        detail: impl Into<String>,
    ) {
        self.push(ReviewRecord::new(kind, subject_ids, detail));
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ReviewRecord>) {
        for record in records {
            self.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    pub fn records(&self) -> &[ReviewRecord] {
        &self.records
    }

    /// Records in table order: by kind, then subjects, then detail.
    ///
    /// Identical records, such as the same dangling edge given twice, become
    /// one row whose detail ends with how often it was reported.
    pub fn into_sorted(mut self) -> Vec<ReviewRecord> {
        self.records.sort();

        let mut rows: Vec<(ReviewRecord, usize)> = Vec::with_capacity(self.records.len());
        for record in self.records {
            match rows.last_mut() {
                Some((last, count)) if *last == record => *count += 1,
                _ => rows.push((record, 1)),
            }
        }

        rows.into_iter()
            .map(|(mut record, count)| {
                if count > 1 {
                    record.detail = format!("{} (reported {} times)", record.detail, count);
                }
                record
            })
            .collect()
    }
}
