//! SQLite-backed persistence for scheduled events.
//!
//! Single table, indexed for `status + scheduled_at` range scans and
//! priority ordering. Pickup uses a conditional update as an atomic claim,
//! so two batch runners never double-execute the same record.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fundflow_core::config::Priority;
use fundflow_core::error::{FundflowError, Result};
use rusqlite::Connection;

use crate::record::{ScheduledEvent, Status};

/// Which terminal statuses a sweep targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Processed,
    Failed,
    /// Both terminal statuses. Never pending/processing.
    All,
}

impl StatusFilter {
    fn sql_condition(&self) -> &'static str {
        match self {
            StatusFilter::Processed => "status = 'processed'",
            StatusFilter::Failed => "status = 'failed'",
            StatusFilter::All => "status IN ('processed', 'failed')",
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = FundflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(StatusFilter::Processed),
            "failed" => Ok(StatusFilter::Failed),
            "all" => Ok(StatusFilter::All),
            other => Err(FundflowError::Config(format!(
                "Unknown status filter: {other} (expected processed|failed|all)"
            ))),
        }
    }
}

const COLUMNS: &str = "id, event_type, payload, priority, status, attempts, max_attempts, \
                       scheduled_at, processed_at, last_error, metadata, created_at, updated_at";

/// SQLite store for scheduled events.
pub struct ScheduledStore {
    conn: Mutex<Connection>,
}

impl ScheduledStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| FundflowError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests and the dry-run tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FundflowError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS scheduled_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,              -- JSON snapshot
                priority INTEGER NOT NULL DEFAULT 20,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                scheduled_at TEXT NOT NULL,
                processed_at TEXT,
                last_error TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scheduled_due
                ON scheduled_events(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_scheduled_priority
                ON scheduled_events(priority);",
        )
        .map_err(|e| FundflowError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FundflowError::Store(format!("DB lock poisoned: {e}")))
    }

    /// Persist a newly scheduled event.
    pub fn insert(&self, ev: &ScheduledEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scheduled_events
             (id, event_type, payload, priority, status, attempts, max_attempts,
              scheduled_at, processed_at, last_error, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                ev.id,
                ev.event_type,
                ev.payload.to_string(),
                ev.priority.weight(),
                ev.status.as_str(),
                ev.attempts,
                ev.max_attempts,
                ev.scheduled_at.to_rfc3339(),
                ev.processed_at.map(|t| t.to_rfc3339()),
                ev.last_error,
                ev.metadata.to_string(),
                ev.created_at.to_rfc3339(),
                ev.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FundflowError::Store(format!("Insert: {e}")))?;
        Ok(())
    }

    /// Load one record by ID.
    pub fn get(&self, id: &str) -> Result<Option<ScheduledEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_events WHERE id = ?1"
            ))
            .map_err(|e| FundflowError::Store(format!("Get: {e}")))?;
        let mut rows = stmt
            .query_map([id], row_to_event)
            .map_err(|e| FundflowError::Store(format!("Get: {e}")))?;
        match rows.next() {
            Some(row) => Ok(Some(
                row.map_err(|e| FundflowError::Store(format!("Get: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    /// Select due pending records without mutating them (dry-run support).
    ///
    /// Ordered by priority descending, then earliest `scheduled_at` first.
    pub fn due_preview(
        &self,
        limit: u32,
        priority: Option<Priority>,
    ) -> Result<Vec<ScheduledEvent>> {
        let conn = self.lock()?;
        self.select_due(&conn, limit, priority)
    }

    /// Select due pending records and atomically claim each one.
    ///
    /// The conditional update succeeds for exactly one caller per record; a
    /// row claimed by someone else between select and update is skipped.
    pub fn claim_due(
        &self,
        limit: u32,
        priority: Option<Priority>,
    ) -> Result<Vec<ScheduledEvent>> {
        let conn = self.lock()?;
        let candidates = self.select_due(&conn, limit, priority)?;
        let now = Utc::now().to_rfc3339();

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut ev in candidates {
            let changed = conn
                .execute(
                    "UPDATE scheduled_events SET status = 'processing', updated_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    rusqlite::params![now, ev.id],
                )
                .map_err(|e| FundflowError::Store(format!("Claim: {e}")))?;
            if changed == 1 {
                ev.status = Status::Processing;
                claimed.push(ev);
            }
        }
        Ok(claimed)
    }

    fn select_due(
        &self,
        conn: &Connection,
        limit: u32,
        priority: Option<Priority>,
    ) -> Result<Vec<ScheduledEvent>> {
        // Weight 0 disables the priority filter; real weights start at 10.
        let weight = priority.map(|p| p.weight()).unwrap_or(0);
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_events
                 WHERE status = 'pending' AND scheduled_at <= ?1
                   AND (?2 = 0 OR priority = ?2)
                 ORDER BY priority DESC, scheduled_at ASC
                 LIMIT ?3"
            ))
            .map_err(|e| FundflowError::Store(format!("Select due: {e}")))?;
        let rows = stmt
            .query_map(
                rusqlite::params![Utc::now().to_rfc3339(), weight, limit],
                row_to_event,
            )
            .map_err(|e| FundflowError::Store(format!("Select due: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| FundflowError::Store(format!("Select due: {e}")))
    }

    /// Terminal success: set `processed_at`, status `processed`.
    pub fn mark_processed(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE scheduled_events
             SET status = 'processed', processed_at = ?1, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, id],
        )
        .map_err(|e| FundflowError::Store(format!("Mark processed: {e}")))?;
        Ok(())
    }

    /// Back to pending with advanced `scheduled_at` after a failed attempt.
    pub fn mark_retry(
        &self,
        id: &str,
        attempts: u32,
        next_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_events
             SET status = 'pending', attempts = ?1, scheduled_at = ?2,
                 last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![attempts, next_at.to_rfc3339(), error, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| FundflowError::Store(format!("Mark retry: {e}")))?;
        Ok(())
    }

    /// Terminal failure: attempts exhausted, final diagnostic retained.
    pub fn mark_failed(&self, id: &str, attempts: u32, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scheduled_events
             SET status = 'failed', attempts = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![attempts, error, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| FundflowError::Store(format!("Mark failed: {e}")))?;
        Ok(())
    }

    /// Administrative retry: reset one failed record to pending, due now.
    /// Returns false if the record is missing or not in `failed` status.
    pub fn reset_for_retry(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn
            .execute(
                "UPDATE scheduled_events
                 SET status = 'pending', attempts = 0, scheduled_at = ?1,
                     last_error = NULL, processed_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'failed'",
                rusqlite::params![now, id],
            )
            .map_err(|e| FundflowError::Store(format!("Reset: {e}")))?;
        Ok(changed == 1)
    }

    /// Delete terminal records created before the cutoff.
    ///
    /// Dry-run reports the candidate count and an id sample without deleting.
    pub fn purge(
        &self,
        cutoff: DateTime<Utc>,
        filter: StatusFilter,
        dry_run: bool,
    ) -> Result<(usize, Vec<String>)> {
        let conn = self.lock()?;
        let cutoff_str = cutoff.to_rfc3339();
        let condition = filter.sql_condition();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT id FROM scheduled_events
                 WHERE {condition} AND created_at < ?1
                 ORDER BY created_at ASC"
            ))
            .map_err(|e| FundflowError::Store(format!("Purge select: {e}")))?;
        let ids = stmt
            .query_map([&cutoff_str], |row| row.get::<_, String>(0))
            .map_err(|e| FundflowError::Store(format!("Purge select: {e}")))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| FundflowError::Store(format!("Purge select: {e}")))?;

        let sample: Vec<String> = ids.iter().take(5).cloned().collect();
        if dry_run {
            return Ok((ids.len(), sample));
        }

        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM scheduled_events WHERE {condition} AND created_at < ?1"
                ),
                [&cutoff_str],
            )
            .map_err(|e| FundflowError::Store(format!("Purge delete: {e}")))?;
        Ok((deleted, sample))
    }

    /// Per-status record counts, for the status command.
    pub fn status_counts(&self) -> Result<Vec<(Status, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT status, COUNT(*) FROM scheduled_events GROUP BY status ORDER BY status",
            )
            .map_err(|e| FundflowError::Store(format!("Counts: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    Status::parse(&row.get::<_, String>(0)?),
                    row.get::<_, i64>(1)? as u64,
                ))
            })
            .map_err(|e| FundflowError::Store(format!("Counts: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| FundflowError::Store(format!("Counts: {e}")))
    }
}

/// A corrupt column is a real error, not something to paper over: a broken
/// timestamp would otherwise make a future record instantly due, and a
/// broken payload would execute listeners against `null`.
fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledEvent> {
    let payload_str: String = row.get(2)?;
    let metadata_str: String = row.get(10)?;
    let status_str: String = row.get(4)?;
    let scheduled_at_str: String = row.get(7)?;
    let processed_at_str: Option<String> = row.get(8)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    Ok(ScheduledEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        payload: parse_json(2, &payload_str)?,
        priority: Priority::from_weight(row.get::<_, i64>(3)?),
        status: Status::parse(&status_str),
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        scheduled_at: parse_ts(7, &scheduled_at_str)?,
        processed_at: processed_at_str
            .as_deref()
            .map(|s| parse_ts(8, s))
            .transpose()?,
        last_error: row.get(9)?,
        metadata: parse_json(10, &metadata_str)?,
        created_at: parse_ts(11, &created_at_str)?,
        updated_at: parse_ts(12, &updated_at_str)?,
    })
}

fn parse_json(idx: usize, s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(priority: Priority, due_in_secs: i64) -> ScheduledEvent {
        ScheduledEvent::new(
            "investment.created",
            serde_json::json!({"amount": 500}),
            priority,
            3,
            Utc::now() + Duration::seconds(due_in_secs),
            serde_json::json!({}),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -10);
        store.insert(&ev).unwrap();

        let loaded = store.get(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.event_type, "investment.created");
        assert_eq!(loaded.payload, serde_json::json!({"amount": 500}));
        assert_eq!(loaded.status, Status::Pending);
        assert_eq!(loaded.priority, Priority::Medium);
    }

    #[test]
    fn test_claim_orders_by_priority_then_time() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let low = record(Priority::Low, -30);
        let critical = record(Priority::Critical, -10);
        let medium = record(Priority::Medium, -20);
        store.insert(&low).unwrap();
        store.insert(&critical).unwrap();
        store.insert(&medium).unwrap();

        let claimed = store.claim_due(2, None).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, critical.id);
        assert_eq!(claimed[1].id, medium.id);
        assert!(claimed.iter().all(|c| c.status == Status::Processing));

        // The low record is still pending and gets picked next round
        let rest = store.claim_due(2, None).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, low.id);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();

        assert_eq!(store.claim_due(10, None).unwrap().len(), 1);
        // Already processing — a second claim finds nothing
        assert!(store.claim_due(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_claim_skips_future_records() {
        let store = ScheduledStore::open_in_memory().unwrap();
        store.insert(&record(Priority::Critical, 3600)).unwrap();
        assert!(store.claim_due(10, None).unwrap().is_empty());
    }

    #[test]
    fn test_priority_filter() {
        let store = ScheduledStore::open_in_memory().unwrap();
        store.insert(&record(Priority::High, -10)).unwrap();
        store.insert(&record(Priority::Low, -10)).unwrap();

        let claimed = store.claim_due(10, Some(Priority::Low)).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].priority, Priority::Low);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();

        let preview = store.due_preview(10, None).unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(
            store.get(&ev.id).unwrap().unwrap().status,
            Status::Pending
        );
    }

    #[test]
    fn test_retry_and_fail_transitions() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();
        store.claim_due(1, None).unwrap();

        let next = Utc::now() + Duration::seconds(60);
        store.mark_retry(&ev.id, 1, next, "ledger timeout").unwrap();
        let loaded = store.get(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Pending);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("ledger timeout"));

        store.mark_failed(&ev.id, 3, "ledger down").unwrap();
        let loaded = store.get(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Failed);
        assert_eq!(loaded.attempts, 3);
    }

    #[test]
    fn test_processed_sets_timestamp() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();
        store.mark_processed(&ev.id).unwrap();

        let loaded = store.get(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Processed);
        assert!(loaded.processed_at.is_some());
    }

    #[test]
    fn test_reset_for_retry_only_failed() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();

        // Pending record is not resettable
        assert!(!store.reset_for_retry(&ev.id).unwrap());

        store.mark_failed(&ev.id, 3, "boom").unwrap();
        assert!(store.reset_for_retry(&ev.id).unwrap());

        let loaded = store.get(&ev.id).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Pending);
        assert_eq!(loaded.attempts, 0);
        assert!(loaded.last_error.is_none());
    }

    #[test]
    fn test_purge_only_terminal_and_old() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let mut old_processed = record(Priority::Medium, -5);
        old_processed.created_at = Utc::now() - Duration::days(10);
        let mut old_pending = record(Priority::Medium, -5);
        old_pending.created_at = Utc::now() - Duration::days(10);
        store.insert(&old_processed).unwrap();
        store.insert(&old_pending).unwrap();
        store.mark_processed(&old_processed.id).unwrap();

        let cutoff = Utc::now() - Duration::days(7);

        // Dry run: one candidate, nothing deleted
        let (count, sample) = store.purge(cutoff, StatusFilter::Processed, true).unwrap();
        assert_eq!(count, 1);
        assert_eq!(sample, vec![old_processed.id.clone()]);
        assert!(store.get(&old_processed.id).unwrap().is_some());

        // Real run deletes the processed record, never the pending one
        let (deleted, _) = store.purge(cutoff, StatusFilter::All, false).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(&old_processed.id).unwrap().is_none());
        assert!(store.get(&old_pending.id).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let store = ScheduledStore::open_in_memory().unwrap();
        // Due tomorrow; a silently "repaired" timestamp would make it due now.
        let ev = record(Priority::Medium, 86_400);
        store.insert(&ev).unwrap();

        // Not RFC 3339, but still lexically before any real timestamp so the
        // due-range scan picks the row up.
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduled_events SET scheduled_at = '1999-13-45T99:99:99Z' WHERE id = ?1",
                [&ev.id],
            )
            .unwrap();

        let err = store.get(&ev.id).unwrap_err();
        assert!(matches!(err, FundflowError::Store(_)));
        let err = store.due_preview(10, None).unwrap_err();
        assert!(matches!(err, FundflowError::Store(_)));
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let store = ScheduledStore::open_in_memory().unwrap();
        let ev = record(Priority::Medium, -5);
        store.insert(&ev).unwrap();

        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduled_events SET payload = '{not json' WHERE id = ?1",
                [&ev.id],
            )
            .unwrap();

        let err = store.get(&ev.id).unwrap_err();
        assert!(matches!(err, FundflowError::Store(_)));
    }

    #[test]
    fn test_status_counts() {
        let store = ScheduledStore::open_in_memory().unwrap();
        store.insert(&record(Priority::Medium, -5)).unwrap();
        let failed = record(Priority::Medium, -5);
        store.insert(&failed).unwrap();
        store.mark_failed(&failed.id, 3, "x").unwrap();

        let counts = store.status_counts().unwrap();
        assert!(counts.contains(&(Status::Pending, 1)));
        assert!(counts.contains(&(Status::Failed, 1)));
    }
}
