//! Processing-mode resolution over the layered events configuration.

use std::sync::Arc;

use fundflow_core::config::{EventsConfig, Mode};

/// Resolves the processing mode for an (event, listener) pair.
///
/// Pure lookup over an immutable config snapshot. Precedence, first match
/// wins: listener override, event override, environment override, global
/// default. Every level has a fallback, so resolution never fails — unless
/// the whole system is switched off, in which case `resolve` returns `None`
/// and the dispatcher drops the event entirely.
pub struct ModeResolver {
    config: Arc<EventsConfig>,
    env: String,
}

impl ModeResolver {
    pub fn new(config: Arc<EventsConfig>, env: &str) -> Self {
        Self {
            config,
            env: env.to_string(),
        }
    }

    /// Whether the event system is enabled at all.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Resolve the mode, or `None` when the kill-switch is off.
    pub fn resolve(&self, event_key: Option<&str>, listener_key: Option<&str>) -> Option<Mode> {
        if !self.config.enabled {
            return None;
        }

        // 1. Listener-specific override
        if let (Some(ek), Some(lk)) = (event_key, listener_key)
            && let Some(ev) = self.config.events.get(ek)
            && let Some(listener) = ev.listeners.get(lk)
            && let Some(mode) = listener.mode
        {
            return Some(mode);
        }

        // 2. Event-specific override
        if let Some(ek) = event_key
            && let Some(ev) = self.config.events.get(ek)
            && let Some(mode) = ev.mode
        {
            return Some(mode);
        }

        // 3. Environment override
        if let Some(mode) = self.config.mode_overrides.get(&self.env) {
            return Some(*mode);
        }

        // 4. Global default
        Some(self.config.default_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundflow_core::config::{EventOverride, ListenerOverride};

    fn config_with_layers() -> EventsConfig {
        let mut config = EventsConfig {
            default_mode: Mode::Async,
            ..EventsConfig::default()
        };
        config
            .mode_overrides
            .insert("local".into(), Mode::Immediate);

        let mut ev = EventOverride {
            mode: Some(Mode::Deferred),
            ..EventOverride::default()
        };
        ev.listeners.insert(
            "ledger".into(),
            ListenerOverride {
                mode: Some(Mode::Immediate),
                ..ListenerOverride::default()
            },
        );
        config.events.insert("investment.created".into(), ev);
        config
    }

    #[test]
    fn test_listener_override_wins() {
        let resolver = ModeResolver::new(Arc::new(config_with_layers()), "local");
        assert_eq!(
            resolver.resolve(Some("investment.created"), Some("ledger")),
            Some(Mode::Immediate)
        );
    }

    #[test]
    fn test_event_override_beats_env_and_default() {
        let resolver = ModeResolver::new(Arc::new(config_with_layers()), "local");
        // Unconfigured listener falls through to the event level
        assert_eq!(
            resolver.resolve(Some("investment.created"), Some("unknown")),
            Some(Mode::Deferred)
        );
        assert_eq!(
            resolver.resolve(Some("investment.created"), None),
            Some(Mode::Deferred)
        );
    }

    #[test]
    fn test_env_override_beats_default() {
        let resolver = ModeResolver::new(Arc::new(config_with_layers()), "local");
        assert_eq!(
            resolver.resolve(Some("payout.settled"), None),
            Some(Mode::Immediate)
        );
        assert_eq!(resolver.resolve(None, None), Some(Mode::Immediate));
    }

    #[test]
    fn test_global_default_is_final_fallback() {
        let resolver = ModeResolver::new(Arc::new(config_with_layers()), "production");
        assert_eq!(resolver.resolve(None, None), Some(Mode::Async));
        assert_eq!(resolver.resolve(Some("payout.settled"), None), Some(Mode::Async));
        // A listener key without a matching listener entry changes nothing
        assert_eq!(
            resolver.resolve(Some("payout.settled"), Some("ledger")),
            Some(Mode::Async)
        );
    }

    #[test]
    fn test_event_override_without_mode_falls_through() {
        let mut config = config_with_layers();
        config
            .events
            .insert("kyc.approved".into(), EventOverride::default());
        let resolver = ModeResolver::new(Arc::new(config), "production");
        assert_eq!(resolver.resolve(Some("kyc.approved"), None), Some(Mode::Async));
    }

    #[test]
    fn test_disabled_short_circuits_every_level() {
        let mut config = config_with_layers();
        config.enabled = false;
        let resolver = ModeResolver::new(Arc::new(config), "local");
        assert_eq!(resolver.resolve(Some("investment.created"), Some("ledger")), None);
        assert_eq!(resolver.resolve(None, None), None);
        assert!(!resolver.enabled());
    }
}
