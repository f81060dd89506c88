use std::time::Duration;

use tabvault_core::config::BindingConfig;
use tabvault_core::Namespace;

#[derive(Debug, Clone)]
pub struct BindingOptions {
    pub encrypt: bool,
    /// TTL for encrypted writes.
    pub expires_in: Option<Duration>,
    pub namespace: Option<Namespace>,
    /// Follow writes made by other tabs. Ignored when `encrypt` is set.
    pub sync_across_tabs: bool,
    /// Window over which bursts of other-tab writes are coalesced.
    pub debounce: Duration,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            encrypt: false,
            expires_in: None,
            namespace: None,
            sync_across_tabs: true,
            debounce: Duration::from_millis(100),
        }
    }
}

impl BindingOptions {
    pub fn from_config(config: &BindingConfig) -> Self {
        Self {
            sync_across_tabs: config.sync_across_tabs,
            debounce: Duration::from_millis(config.sync_debounce_ms),
            ..Self::default()
        }
    }

    pub fn encrypted() -> Self {
        Self {
            encrypt: true,
            ..Self::default()
        }
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn namespace(mut self, ns: Namespace) -> Self {
        self.namespace = Some(ns);
        self
    }

    pub fn sync_across_tabs(mut self, on: bool) -> Self {
        self.sync_across_tabs = on;
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Whether a cross-tab listener should run for these options.
    pub(crate) fn listens(&self) -> bool {
        self.sync_across_tabs && !self.encrypt
    }
}
