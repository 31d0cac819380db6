//! Event registry — stable string keys mapped to typed deserializers and
//! registered listeners. Populated once at startup; no reflection, no
//! dynamic instantiation from stored class names.

use std::collections::HashMap;
use std::sync::Arc;

use fundflow_core::error::{FundflowError, Result};
use fundflow_core::event::{DomainEvent, Listener};
use serde::de::DeserializeOwned;

type EventFactory =
    Box<dyn Fn(serde_json::Value) -> Result<Box<dyn DomainEvent>> + Send + Sync>;

#[derive(Default)]
pub struct EventRegistry {
    factories: HashMap<String, EventFactory>,
    listeners: HashMap<String, Vec<Arc<dyn Listener>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deserializer factory for an event type key.
    pub fn register_factory<F>(&mut self, event_type: &str, factory: F)
    where
        F: Fn(serde_json::Value) -> Result<Box<dyn DomainEvent>> + Send + Sync + 'static,
    {
        self.factories.insert(event_type.to_string(), Box::new(factory));
    }

    /// Register an event type whose payload deserializes straight into `E`.
    pub fn register_event<E>(&mut self, event_type: &str)
    where
        E: DomainEvent + DeserializeOwned + 'static,
    {
        self.register_factory(event_type, |payload| {
            let event: E = serde_json::from_value(payload)
                .map_err(|e| FundflowError::Serialize(format!("Payload decode: {e}")))?;
            Ok(Box::new(event) as Box<dyn DomainEvent>)
        });
    }

    /// Attach a listener to an event type.
    pub fn register_listener(&mut self, event_type: &str, listener: Arc<dyn Listener>) {
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .push(listener);
    }

    /// Listeners registered for an event type, in registration order.
    pub fn listeners_for(&self, event_type: &str) -> &[Arc<dyn Listener>] {
        self.listeners
            .get(event_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of registered event type factories. Zero means nothing stored
    /// in the scheduled store can be rehydrated.
    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }

    /// Rebuild an event from its stored type key and payload snapshot.
    pub fn rehydrate(
        &self,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<Box<dyn DomainEvent>> {
        let factory = self
            .factories
            .get(event_type)
            .ok_or_else(|| FundflowError::UnknownEvent(event_type.to_string()))?;
        factory(payload)
    }

    /// Run every listener for the event sequentially in the caller's task.
    ///
    /// This is the single immediate-execution path: direct dispatch, the
    /// queue worker, and the batch processor all come through here. The
    /// first listener error stops the run and propagates.
    pub async fn run_listeners(&self, event: &dyn DomainEvent) -> Result<usize> {
        self.run_listeners_scoped(event, None).await
    }

    /// Like [`run_listeners`](Self::run_listeners), but when `only` is set,
    /// runs just that listener. A missing listener key is an error so a
    /// scoped job cannot silently no-op after a listener is deregistered.
    pub async fn run_listeners_scoped(
        &self,
        event: &dyn DomainEvent,
        only: Option<&str>,
    ) -> Result<usize> {
        let listeners = self.listeners_for(event.event_type());
        match only {
            None => {
                for listener in listeners {
                    listener.handle(event).await.map_err(|e| {
                        FundflowError::Listener(format!("{}: {e}", listener.key()))
                    })?;
                }
                Ok(listeners.len())
            }
            Some(key) => {
                let listener = listeners
                    .iter()
                    .find(|l| l.key() == key)
                    .ok_or_else(|| {
                        FundflowError::Listener(format!(
                            "No listener '{key}' registered for '{}'",
                            event.event_type()
                        ))
                    })?;
                listener.handle(event).await.map_err(|e| {
                    FundflowError::Listener(format!("{}: {e}", listener.key()))
                })?;
                Ok(1)
            }
        }
    }
}
