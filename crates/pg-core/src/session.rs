//! Per-tab navigation state.

use std::sync::Arc;

use log::debug;

use crate::ledger::RequestLedger;
use crate::registry::FilterListRegistry;
use crate::settings::{DomainSettingRecord, GlobalSettings, ResolvedSettings};

/// State the pipeline needs about one tab's current page.
///
/// Owned by the tab; only that tab's request path mutates it. The ledger is
/// behind an `Arc` so the UI can read it while requests are classified.
#[derive(Debug)]
pub struct TabSession {
    current_url: String,
    current_host: String,
    current_domain: String,
    settings: ResolvedSettings,
    record: Option<DomainSettingRecord>,
    ledger: Arc<RequestLedger>,
    navigation_id: u64,
}

impl Default for TabSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TabSession {
    /// A tab that has not navigated yet.
    pub fn new() -> Self {
        Self {
            current_url: String::new(),
            current_host: String::new(),
            current_domain: String::new(),
            settings: ResolvedSettings::from_globals(&GlobalSettings::default()),
            record: None,
            ledger: Arc::new(RequestLedger::new()),
            navigation_id: 0,
        }
    }

    /// Start a top-level navigation: clear the ledger and re-resolve domain
    /// settings. Returns whether the registrable domain changed.
    pub fn begin_navigation(&mut self, url: &str, registry: &FilterListRegistry) -> bool {
        let resolution = registry.resolve_domain_settings(url);
        let domain_changed = resolution.registrable_domain != self.current_domain;

        self.ledger.clear();
        self.navigation_id += 1;
        self.current_url = url.to_string();
        self.current_host = resolution.host;
        self.current_domain = resolution.registrable_domain;
        self.settings = resolution.settings;
        self.record = resolution.record;

        debug!(
            "Navigation {} to {:?} (domain settings applied: {})",
            self.navigation_id, self.current_host, self.settings.domain_settings_applied
        );
        domain_changed
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    pub fn current_host(&self) -> &str {
        &self.current_host
    }

    pub fn current_registrable_domain(&self) -> &str {
        &self.current_domain
    }

    pub fn domain_settings_applied(&self) -> bool {
        self.settings.domain_settings_applied
    }

    pub fn block_all_third_party(&self) -> bool {
        self.settings.block_all_third_party
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub fn domain_record(&self) -> Option<&DomainSettingRecord> {
        self.record.as_ref()
    }

    pub fn ledger(&self) -> &Arc<RequestLedger> {
        &self.ledger
    }

    /// Incremented on every top-level navigation.
    pub fn navigation_id(&self) -> u64 {
        self.navigation_id
    }
}
