//! Fundflow configuration system.
//!
//! One immutable snapshot, assembled at startup and passed by `Arc` into the
//! resolver and dispatcher. Nothing in the engine reads ambient global state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{FundflowError, Result};

/// How reactions to an event run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run listeners synchronously in the caller's task.
    #[serde(alias = "sync")]
    Immediate,
    /// Hand off to the worker-pool queue, fire-and-forget.
    #[serde(alias = "queue")]
    Async,
    /// Persist a scheduled record for a later batch run.
    #[serde(alias = "scheduled")]
    Deferred,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Immediate => "immediate",
            Mode::Async => "async",
            Mode::Deferred => "deferred",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse ordering and queue-routing hint for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric weight for ordering (higher = picked first).
    pub fn weight(&self) -> i64 {
        match self {
            Priority::Critical => 40,
            Priority::High => 30,
            Priority::Medium => 20,
            Priority::Low => 10,
        }
    }

    pub fn from_weight(w: i64) -> Self {
        match w {
            40 => Priority::Critical,
            30 => Priority::High,
            10 => Priority::Low,
            _ => Priority::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = FundflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(FundflowError::Config(format!("Unknown priority: {other}"))),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundflowConfig {
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub scheduled: ScheduledConfig,
}

impl FundflowConfig {
    /// Load config from the default path (~/.fundflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FundflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FundflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Fundflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fundflow")
    }
}

/// Event routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Operator kill-switch. When off, dispatch is a no-op everywhere.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Global default processing mode — the last resolution fallback.
    #[serde(default = "default_mode")]
    pub default_mode: Mode,
    /// Log every dispatch decision.
    #[serde(default)]
    pub monitor: bool,
    /// Queue name used when no priority mapping matches.
    #[serde(default = "default_queue")]
    pub default_queue: String,
    /// Attempt ceiling when an event does not override it.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Per-attempt retry delays in seconds; the last entry repeats.
    #[serde(default = "default_backoff")]
    pub backoff: Vec<u64>,
    /// Per-attempt queue timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Environment name → mode (e.g. local → immediate).
    #[serde(default)]
    pub mode_overrides: HashMap<String, Mode>,
    /// Priority → queue name for async routing.
    #[serde(default)]
    pub queues: HashMap<Priority, String>,
    /// Per-event overrides keyed by event key.
    #[serde(default)]
    pub events: HashMap<String, EventOverride>,
}

fn bool_true() -> bool {
    true
}
fn default_mode() -> Mode {
    Mode::Immediate
}
fn default_queue() -> String {
    "events".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff() -> Vec<u64> {
    vec![60, 300, 900]
}
fn default_timeout() -> u64 {
    120
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_mode: default_mode(),
            monitor: false,
            default_queue: default_queue(),
            default_max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            timeout_secs: default_timeout(),
            mode_overrides: HashMap::new(),
            queues: HashMap::new(),
            events: HashMap::new(),
        }
    }
}

impl EventsConfig {
    /// Per-event override, if any.
    pub fn event(&self, key: &str) -> Option<&EventOverride> {
        self.events.get(key)
    }

    /// Per-listener override, if any.
    pub fn listener(&self, event_key: &str, listener_key: &str) -> Option<&ListenerOverride> {
        self.events
            .get(event_key)
            .and_then(|e| e.listeners.get(listener_key))
    }

    /// Queue name for a priority, falling back to the default queue.
    pub fn queue_for(&self, priority: Priority) -> &str {
        self.queues
            .get(&priority)
            .map(String::as_str)
            .unwrap_or(&self.default_queue)
    }

    /// Explicitly named queue, bypassing the priority map.
    /// Listener level wins over event level.
    pub fn explicit_queue_for(
        &self,
        event_key: Option<&str>,
        listener_key: Option<&str>,
    ) -> Option<&str> {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(q) = self.listener(ek, lk).and_then(|l| l.queue.as_deref())
        {
            return Some(q);
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.queue.as_deref())
    }

    /// Attempt ceiling: listener override, then event override, then global.
    pub fn max_attempts_for(&self, event_key: Option<&str>, listener_key: Option<&str>) -> u32 {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(n) = self.listener(ek, lk).and_then(|l| l.max_attempts)
        {
            return n;
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.max_attempts)
            .unwrap_or(self.default_max_attempts)
    }

    /// Backoff schedule: listener override, then event override, then global.
    pub fn backoff_for(&self, event_key: Option<&str>, listener_key: Option<&str>) -> &[u64] {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(b) = self.listener(ek, lk).and_then(|l| l.backoff.as_deref())
        {
            return b;
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.backoff.as_deref())
            .unwrap_or(&self.backoff)
    }

    /// Priority: listener override, then event override, then medium.
    pub fn priority_for(&self, event_key: Option<&str>, listener_key: Option<&str>) -> Priority {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(p) = self.listener(ek, lk).and_then(|l| l.priority)
        {
            return p;
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.priority)
            .unwrap_or(Priority::Medium)
    }

    /// Defer frequency hint: listener override, then event override.
    pub fn frequency_for(
        &self,
        event_key: Option<&str>,
        listener_key: Option<&str>,
    ) -> Option<&str> {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(f) = self.listener(ek, lk).and_then(|l| l.frequency.as_deref())
        {
            return Some(f);
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.frequency.as_deref())
    }

    /// Queue timeout: listener override, then event override, then global.
    pub fn timeout_for(&self, event_key: Option<&str>, listener_key: Option<&str>) -> u64 {
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(t) = self.listener(ek, lk).and_then(|l| l.timeout_secs)
        {
            return t;
        }
        event_key
            .and_then(|k| self.events.get(k))
            .and_then(|e| e.timeout_secs)
            .unwrap_or(self.timeout_secs)
    }
}

/// Per-event configuration override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventOverride {
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Explicit queue, bypassing the priority map.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<Vec<u64>>,
    /// Defer frequency hint: immediate, hourly, daily, weekly.
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Per-listener overrides — highest resolution precedence.
    #[serde(default)]
    pub listeners: HashMap<String, ListenerOverride>,
}

/// Per-listener configuration override. Same knobs as the event level;
/// takes precedence when a dispatch is scoped to one listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerOverride {
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Explicit queue, bypassing the priority map.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<Vec<u64>>,
    /// Defer frequency hint: immediate, hourly, daily, weekly.
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Deferred-processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// SQLite database path for scheduled events.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Max records per batch run.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// How often the external trigger (cron/systemd timer) should invoke
    /// `process-scheduled`. Consumed by the operator, not the engine.
    #[serde(default = "default_cadence_minutes")]
    pub cadence_minutes: u32,
    /// Terminal records older than this many days are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_db_path() -> String {
    "~/.fundflow/scheduled.db".into()
}
fn default_batch_size() -> u32 {
    50
}
fn default_cadence_minutes() -> u32 {
    5
}
fn default_retention_days() -> u32 {
    30
}

impl Default for ScheduledConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            batch_size: default_batch_size(),
            cadence_minutes: default_cadence_minutes(),
            retention_days: default_retention_days(),
        }
    }
}
