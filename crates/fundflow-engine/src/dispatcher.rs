//! Dispatch router — per event, decide immediate / async / deferred and
//! execute the matching strategy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fundflow_core::config::{EventsConfig, Mode};
use fundflow_core::error::Result;
use fundflow_core::event::DomainEvent;

use crate::queue::{QueueBackend, QueueJob};
use crate::record::ScheduledEvent;
use crate::registry::EventRegistry;
use crate::resolver::ModeResolver;
use crate::store::ScheduledStore;

/// What the router did with a dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Kill-switch is off: nothing ran, nothing was queued or persisted.
    Disabled,
    /// Immediate mode: listeners ran synchronously in the caller's task.
    Executed { listeners: usize },
    /// Async mode: handed off to the worker pool.
    Enqueued { queue: String },
    /// Deferred mode: a scheduled record was created.
    Scheduled { id: String },
}

pub struct Dispatcher {
    config: Arc<EventsConfig>,
    resolver: ModeResolver,
    registry: Arc<EventRegistry>,
    queue: Arc<dyn QueueBackend>,
    store: Arc<ScheduledStore>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<EventsConfig>,
        registry: Arc<EventRegistry>,
        queue: Arc<dyn QueueBackend>,
        store: Arc<ScheduledStore>,
        env: &str,
    ) -> Self {
        let resolver = ModeResolver::new(config.clone(), env);
        Self {
            config,
            resolver,
            registry,
            queue,
            store,
        }
    }

    /// Route one event. `event_key` scopes the config lookup; without it
    /// only the environment and global layers apply.
    pub async fn dispatch(
        &self,
        event: &dyn DomainEvent,
        event_key: Option<&str>,
    ) -> Result<DispatchOutcome> {
        self.route(event, event_key, None).await
    }

    /// Route one event scoped to a single listener. The listener's own
    /// config overrides take highest precedence, and whatever strategy wins
    /// executes only that listener.
    pub async fn dispatch_listener(
        &self,
        event: &dyn DomainEvent,
        event_key: Option<&str>,
        listener_key: &str,
    ) -> Result<DispatchOutcome> {
        self.route(event, event_key, Some(listener_key)).await
    }

    async fn route(
        &self,
        event: &dyn DomainEvent,
        event_key: Option<&str>,
        listener_key: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let Some(mode) = self.resolver.resolve(event_key, listener_key) else {
            tracing::debug!("Event system disabled, dropping '{}'", event.event_type());
            return Ok(DispatchOutcome::Disabled);
        };

        if self.config.monitor {
            tracing::info!(
                "Dispatch: event={} listener={} mode={} env={}",
                event.event_type(),
                listener_key.unwrap_or("*"),
                mode,
                self.resolver.env()
            );
        }

        match mode {
            Mode::Immediate => {
                let listeners = self
                    .registry
                    .run_listeners_scoped(event, listener_key)
                    .await?;
                Ok(DispatchOutcome::Executed { listeners })
            }
            Mode::Async => self.enqueue(event, event_key, listener_key).await,
            Mode::Deferred => self.schedule(event, event_key, listener_key),
        }
    }

    /// Forced-immediate execution, bypassing mode resolution. Used by the
    /// batch processor so a due deferred event can never re-defer itself.
    pub async fn dispatch_now(&self, event: &dyn DomainEvent) -> Result<usize> {
        self.registry.run_listeners(event).await
    }

    async fn enqueue(
        &self,
        event: &dyn DomainEvent,
        event_key: Option<&str>,
        listener_key: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let priority = self.config.priority_for(event_key, listener_key);
        let queue = self
            .config
            .explicit_queue_for(event_key, listener_key)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.queue_for(priority).to_string());
        let timeout = self.config.timeout_for(event_key, listener_key);

        let job = QueueJob {
            queue: queue.clone(),
            event_type: event.event_type().to_string(),
            payload: event.payload(),
            listener: listener_key.map(str::to_string),
            max_attempts: self.config.max_attempts_for(event_key, listener_key),
            timeout: Duration::from_secs(timeout),
            backoff: self.config.backoff_for(event_key, listener_key).to_vec(),
        };
        self.queue.enqueue(job).await?;
        Ok(DispatchOutcome::Enqueued { queue })
    }

    fn schedule(
        &self,
        event: &dyn DomainEvent,
        event_key: Option<&str>,
        listener_key: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let frequency = self.config.frequency_for(event_key, listener_key);
        let scheduled_at = Utc::now() + defer_offset(frequency);

        let mut metadata = serde_json::json!({
            "dispatched_at": Utc::now().to_rfc3339(),
            "environment": self.resolver.env(),
            "source": "dispatcher",
        });
        if let Some(key) = event_key {
            metadata["event_key"] = serde_json::Value::String(key.to_string());
        }
        if let Some(lk) = listener_key {
            metadata["listener_key"] = serde_json::Value::String(lk.to_string());
        }

        let record = ScheduledEvent::new(
            event.event_type(),
            event.payload(),
            self.config.priority_for(event_key, listener_key),
            self.config.max_attempts_for(event_key, listener_key),
            scheduled_at,
            metadata,
        );
        self.store.insert(&record)?;
        tracing::debug!(
            "Scheduled '{}' as {} for {}",
            event.event_type(),
            record.id,
            scheduled_at
        );
        Ok(DispatchOutcome::Scheduled { id: record.id })
    }
}

/// Defer offset for a frequency hint. Unrecognized hints get the 5-minute
/// default rather than an error — a configuration gap is never fatal.
fn defer_offset(hint: Option<&str>) -> chrono::Duration {
    match hint {
        Some("immediate") => chrono::Duration::zero(),
        Some("hourly") => chrono::Duration::hours(1),
        Some("daily") => chrono::Duration::days(1),
        Some("weekly") => chrono::Duration::weeks(1),
        _ => chrono::Duration::minutes(5),
    }
}
