//! Domain event and listener trait seams.
//!
//! Application code implements these; the engine only ever sees the traits.
//! An event carries a stable type key plus a value snapshot of its data, so
//! a deferred copy can be rehydrated long after the original object is gone.

use async_trait::async_trait;

use crate::error::Result;

/// A typed record describing something that happened in the domain.
pub trait DomainEvent: Send + Sync {
    /// Stable string key identifying this event type in the registry
    /// (e.g. "investment.created"). Must not change across deploys while
    /// deferred records of this type may still exist.
    fn event_type(&self) -> &'static str;

    /// Value snapshot of the event data at dispatch time.
    fn payload(&self) -> serde_json::Value;
}

impl std::fmt::Debug for dyn DomainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainEvent")
            .field("event_type", &self.event_type())
            .field("payload", &self.payload())
            .finish()
    }
}

/// A unit of logic executed in response to an event.
///
/// Listeners report failure through the returned `Result`, never by panic —
/// the batch processor branches on the value.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Listener key, matched against per-listener config overrides.
    fn key(&self) -> &'static str;

    async fn handle(&self, event: &dyn DomainEvent) -> Result<()>;
}
