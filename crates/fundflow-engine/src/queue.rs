//! Worker-pool queue boundary.
//!
//! The engine's whole contract with the pool is the `QueueJob`: destination
//! queue, attempt ceiling, per-attempt timeout, backoff schedule. What the
//! pool does with its workers is its own business.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fundflow_core::error::Result;

use crate::record::backoff_secs;
use crate::registry::EventRegistry;

/// One unit of work handed to the queue.
#[derive(Debug, Clone)]
pub struct QueueJob {
    /// Destination queue name (priority-routed or the default queue).
    pub queue: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// When set, only this listener runs; otherwise all registered listeners.
    pub listener: Option<String>,
    pub max_attempts: u32,
    /// Per-attempt execution timeout.
    pub timeout: Duration,
    /// Per-attempt retry delays in seconds.
    pub backoff: Vec<u64>,
}

/// Queue backend abstraction. A broker integration is a drop-in impl.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Hand off a job. Returns once the job is accepted, not once it ran.
    async fn enqueue(&self, job: QueueJob) -> Result<()>;
}

/// In-process backend: runs each job on a spawned tokio task, executing the
/// event's listeners immediate-fashion with the job's timeout and backoff.
pub struct InProcessQueue {
    registry: Arc<EventRegistry>,
}

impl InProcessQueue {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl QueueBackend for InProcessQueue {
    fn name(&self) -> &str {
        "in-process"
    }

    async fn enqueue(&self, job: QueueJob) -> Result<()> {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            run_job(registry, job).await;
        });
        Ok(())
    }
}

async fn run_job(registry: Arc<EventRegistry>, job: QueueJob) {
    let max_attempts = job.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        let event = match registry.rehydrate(&job.event_type, job.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Queued event '{}' not rehydratable: {e}", job.event_type);
                return;
            }
        };

        let run = registry.run_listeners_scoped(event.as_ref(), job.listener.as_deref());
        match tokio::time::timeout(job.timeout, run).await {
            Ok(Ok(ran)) => {
                tracing::debug!(
                    "Queued event '{}' ran {ran} listener(s) on queue '{}' (attempt {attempt})",
                    job.event_type,
                    job.queue
                );
                return;
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {:?}", job.timeout),
        }

        if attempt < max_attempts {
            let delay = backoff_secs(&job.backoff, attempt);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    tracing::warn!(
        "Queued event '{}' failed after {max_attempts} attempt(s): {last_error}",
        job.event_type
    );
}
