//! Retention sweeper — deletes terminal scheduled events past a configured
//! age. Pure maintenance; it never touches dispatch or live records.

use std::sync::Arc;

use chrono::Utc;
use fundflow_core::error::Result;

use crate::store::{ScheduledStore, StatusFilter};

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Records matching the filter and age cutoff.
    pub candidates: usize,
    /// Records actually deleted (zero on dry-run).
    pub deleted: usize,
    /// Up to five candidate ids, for operator eyeballing.
    pub sample: Vec<String>,
}

pub struct RetentionSweeper {
    store: Arc<ScheduledStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<ScheduledStore>) -> Self {
        Self { store }
    }

    /// Delete terminal records older than `older_than_days`. Dry-run
    /// reports candidates without deleting and always leaves state intact.
    pub fn cleanup(
        &self,
        older_than_days: u32,
        filter: StatusFilter,
        dry_run: bool,
    ) -> Result<CleanupReport> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days as i64);
        let (count, sample) = self.store.purge(cutoff, filter, dry_run)?;

        let report = CleanupReport {
            candidates: count,
            deleted: if dry_run { 0 } else { count },
            sample,
        };
        if dry_run {
            tracing::info!(
                "Cleanup dry-run: {} candidate(s) older than {older_than_days}d",
                report.candidates
            );
        } else {
            tracing::info!(
                "Cleanup: deleted {} record(s) older than {older_than_days}d",
                report.deleted
            );
        }
        Ok(report)
    }
}
