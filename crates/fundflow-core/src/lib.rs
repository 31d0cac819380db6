//! # Fundflow Core
//!
//! Shared foundation for the Fundflow event engine: the layered events
//! configuration, the crate-wide error type, and the `DomainEvent` /
//! `Listener` trait seams that application code implements.

pub mod config;
pub mod error;
pub mod event;

pub use config::{EventsConfig, FundflowConfig, Mode, Priority, ScheduledConfig};
pub use error::{FundflowError, Result};
pub use event::{DomainEvent, Listener};
