//! Batch processor — selects due scheduled events in priority order,
//! re-executes each through the immediate path, and transitions the record.

use std::sync::Arc;

use chrono::Utc;
use fundflow_core::config::{EventsConfig, Priority};
use fundflow_core::error::{FundflowError, Result};

use crate::record::{ScheduledEvent, backoff_secs};
use crate::registry::EventRegistry;
use crate::store::ScheduledStore;

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records that completed successfully this run.
    pub processed: u32,
    /// Records pushed back to pending with a backoff.
    pub retried: u32,
    /// Records that failed terminally this run.
    pub failed: u32,
}

impl BatchOutcome {
    /// True when no record failed terminally (CLI exit-code contract).
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

pub struct BatchProcessor {
    config: Arc<EventsConfig>,
    registry: Arc<EventRegistry>,
    store: Arc<ScheduledStore>,
}

impl BatchProcessor {
    pub fn new(
        config: Arc<EventsConfig>,
        registry: Arc<EventRegistry>,
        store: Arc<ScheduledStore>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    /// One batch pass. Per-record failures never abort the run; a store
    /// error does, and transitions already committed stand.
    ///
    /// Refuses to claim anything when no event type is registered: every
    /// record would fail rehydration and burn an attempt for nothing.
    pub async fn run(&self, limit: u32, priority: Option<Priority>) -> Result<BatchOutcome> {
        if self.registry.factory_count() == 0 {
            return Err(FundflowError::Config(
                "No event types registered; refusing to claim due records".into(),
            ));
        }
        let claimed = self.store.claim_due(limit, priority)?;
        let mut outcome = BatchOutcome::default();
        if claimed.is_empty() {
            return Ok(outcome);
        }
        tracing::info!("Batch run: {} record(s) claimed", claimed.len());

        for record in claimed {
            match self.execute(&record).await {
                Ok(ran) => {
                    self.store.mark_processed(&record.id)?;
                    outcome.processed += 1;
                    tracing::debug!(
                        "Processed {} ('{}', {} listener(s))",
                        record.id,
                        record.event_type,
                        ran
                    );
                }
                Err(e) => {
                    let attempts = record.attempts + 1;
                    let message = e.to_string();
                    if attempts < record.max_attempts {
                        let delay = backoff_secs(self.backoff_schedule(&record), attempts);
                        let next = Utc::now() + chrono::Duration::seconds(delay as i64);
                        self.store.mark_retry(&record.id, attempts, next, &message)?;
                        outcome.retried += 1;
                        tracing::warn!(
                            "Attempt {attempts}/{} failed for {} ('{}'), retrying in {delay}s: {message}",
                            record.max_attempts,
                            record.id,
                            record.event_type
                        );
                    } else {
                        self.store.mark_failed(&record.id, attempts, &message)?;
                        outcome.failed += 1;
                        tracing::warn!(
                            "Record {} ('{}') failed terminally after {attempts} attempt(s): {message}",
                            record.id,
                            record.event_type
                        );
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// The selection a run would claim, without mutating anything.
    pub fn run_dry(&self, limit: u32, priority: Option<Priority>) -> Result<Vec<ScheduledEvent>> {
        self.store.due_preview(limit, priority)
    }

    async fn execute(&self, record: &ScheduledEvent) -> Result<usize> {
        let event = self
            .registry
            .rehydrate(&record.event_type, record.payload.clone())?;
        self.registry
            .run_listeners_scoped(event.as_ref(), listener_scope(record))
            .await
    }

    /// Backoff schedule for a record: the dispatching event key's override
    /// when recorded, the event type's otherwise, else the global list.
    /// A listener-scoped record resolves through that listener first.
    fn backoff_schedule(&self, record: &ScheduledEvent) -> &[u64] {
        let key = record
            .metadata
            .get("event_key")
            .and_then(|v| v.as_str())
            .unwrap_or(&record.event_type);
        self.config.backoff_for(Some(key), listener_scope(record))
    }
}

/// Listener key a record was scoped to at dispatch time, if any.
fn listener_scope(record: &ScheduledEvent) -> Option<&str> {
    record.metadata.get("listener_key").and_then(|v| v.as_str())
}
