//! Aggregated counters for one scraping run.

use serde::Serialize;

/// Row outcome of the upsert pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// A new schedule entry was created.
    Created,
    /// An existing schedule entry had at least one field updated.
    Updated,
    /// The row matched an existing entry with no differences.
    Unchanged,
}

/// Per-run (or per-program) entry counters. Workers fill one of these each
/// and hand it to the job, which merges them into the run total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeStats {
    pub total_entries: i32,
    pub new_entries: i32,
    pub updated_entries: i32,
    pub skipped_rows: i32,
}

impl ScrapeStats {
    /// Counts one persisted row.
    pub fn record(&mut self, outcome: RowOutcome) {
        self.total_entries += 1;
        match outcome {
            RowOutcome::Created => self.new_entries += 1,
            RowOutcome::Updated => self.updated_entries += 1,
            RowOutcome::Unchanged => {}
        }
    }

    /// Folds another stats block into this one.
    pub fn merge(&mut self, other: ScrapeStats) {
        self.total_entries += other.total_entries;
        self.new_entries += other.new_entries;
        self.updated_entries += other.updated_entries;
        self.skipped_rows += other.skipped_rows;
    }
}
