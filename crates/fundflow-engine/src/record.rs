//! Scheduled event record — the durable representation of a deferred event.

use chrono::{DateTime, Utc};
use fundflow_core::config::Priority;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled event.
///
/// `Pending → Processing → {Processed | Pending (retry) | Failed}`.
/// No transition skips `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Processed => "processed",
            Status::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => Status::Processing,
            "processed" => Status::Processed,
            "failed" => Status::Failed,
            _ => Status::Pending,
        }
    }

    /// Terminal states are the sweeper's territory; nothing else deletes them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Processed | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One persisted event awaiting batched execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Unique record ID.
    pub id: String,
    /// Stable registry key used to rehydrate the event.
    pub event_type: String,
    /// Value snapshot of the event data at schedule time.
    pub payload: serde_json::Value,
    /// Selection ordering and queue-routing hint.
    pub priority: Priority,
    /// Lifecycle state.
    pub status: Status,
    /// Execution attempts so far. Never exceeds `max_attempts`.
    pub attempts: u32,
    /// Ceiling on attempts before terminal failure.
    pub max_attempts: u32,
    /// Earliest eligible execution time. Advanced on retry, otherwise fixed.
    pub scheduled_at: DateTime<Utc>,
    /// Set on successful completion, and only then.
    pub processed_at: Option<DateTime<Utc>>,
    /// Diagnostic from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Free-form context: dispatch time, environment, source.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledEvent {
    pub fn new(
        event_type: &str,
        payload: serde_json::Value,
        priority: Priority,
        max_attempts: u32,
        scheduled_at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("sev-{}", uuid::Uuid::new_v4()),
            event_type: event_type.to_string(),
            payload,
            priority,
            status: Status::Pending,
            attempts: 0,
            // A zero ceiling would break the attempts invariant on the
            // first failure; one attempt is the floor.
            max_attempts: max_attempts.max(1),
            scheduled_at,
            processed_at: None,
            last_error: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record is eligible for pickup right now.
    pub fn is_due(&self) -> bool {
        self.status == Status::Pending && Utc::now() >= self.scheduled_at
    }

    /// Whether one more attempt is allowed before terminal failure.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Retry delay in seconds for a 1-based attempt number.
///
/// The first retry uses `schedule[0]`; later attempts reuse the last entry
/// once the schedule is exhausted. An empty schedule falls back to 60s so a
/// misconfigured record cannot spin hot.
pub fn backoff_secs(schedule: &[u64], attempt: u32) -> u64 {
    if schedule.is_empty() {
        return 60;
    }
    let idx = (attempt.saturating_sub(1) as usize).min(schedule.len() - 1);
    schedule[idx]
}
