//! # Fundflow Engine
//!
//! Configurable event routing and scheduled batch processing.
//!
//! Per domain event, the dispatcher decides whether to run reactions
//! immediately, hand them to the worker-pool queue, or persist a scheduled
//! record for a later batch run. The batch processor and retention sweeper
//! are driven by an external periodic trigger and own the record lifecycle.
//!
//! ## Architecture
//! ```text
//! dispatch(event, key)
//!   └── ModeResolver (listener → event → env → default)
//!         ├── immediate → run listeners in the caller's task
//!         ├── async     → QueueBackend (queue name, attempts, timeout, backoff)
//!         └── deferred  → ScheduledStore (SQLite record, pending)
//!
//! cron trigger
//!   ├── BatchProcessor: claim due records → rehydrate → run immediate
//!   │     └── processed | pending (retry + backoff) | failed
//!   └── RetentionSweeper: delete terminal records past retention
//! ```

pub mod dispatcher;
pub mod processor;
pub mod queue;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod sweeper;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use processor::{BatchOutcome, BatchProcessor};
pub use queue::{InProcessQueue, QueueBackend, QueueJob};
pub use record::{ScheduledEvent, Status, backoff_secs};
pub use registry::EventRegistry;
pub use resolver::ModeResolver;
pub use store::{ScheduledStore, StatusFilter};
pub use sweeper::{CleanupReport, RetentionSweeper};
