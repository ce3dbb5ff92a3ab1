//! Process-wide shared state
//!
//! The registry owns everything tabs share: the compiled filter lists, the
//! domain settings table, the global defaults and the suffix list. Each is
//! behind an `ArcSwap`, so readers take a snapshot without locking and a
//! reload publishes a complete new value in one store. A classification that
//! started before a swap finishes against the value it loaded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use log::{info, warn};
use serde::Serialize;

use crate::filter_list::{FilterList, ListHealth};
use crate::psl::SuffixList;
use crate::settings::{DomainSettingRecord, DomainSettingsTable, GlobalSettings, ResolvedSettings};
use crate::types::ListKind;
use crate::url::extract_host;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("filter lists failed to load: {0}")]
    LoadFailed(String),
    #[error("filter lists not loaded after {0:?}")]
    LoadTimeout(Duration),
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a classification waits for the initial list load.
    pub load_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Filter set
// =============================================================================

/// One compiled list per `ListKind`.
#[derive(Debug, Clone)]
pub struct FilterSet {
    lists: [Arc<FilterList>; ListKind::COUNT],
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            lists: std::array::from_fn(|i| Arc::new(FilterList::empty(ListKind::ALL[i].display_name()))),
        }
    }
}

impl FilterSet {
    pub fn get(&self, kind: ListKind) -> &FilterList {
        &self.lists[kind.index()]
    }

    pub fn set(&mut self, kind: ListKind, list: Arc<FilterList>) {
        self.lists[kind.index()] = list;
    }

    /// Copy of this set with one list replaced.
    pub fn with_list(&self, kind: ListKind, list: Arc<FilterList>) -> Self {
        let mut next = self.clone();
        next.set(kind, list);
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (ListKind, &FilterList)> {
        ListKind::ALL.into_iter().zip(self.lists.iter().map(|l| l.as_ref()))
    }
}

// =============================================================================
// Load gate
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug)]
struct GateState {
    state: LoadState,
    failure: Option<String>,
}

/// Blocks classification until the first list load has finished. After it
/// has, the check is a single atomic load.
#[derive(Debug)]
struct LoadGate {
    ready: AtomicBool,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl LoadGate {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            state: Mutex::new(GateState {
                state: LoadState::Pending,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self) {
        let mut gate = self.lock();
        gate.state = LoadState::Ready;
        gate.failure = None;
        self.ready.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    /// Only the first load can fail the gate; later failures keep serving
    /// the lists already installed.
    fn fail(&self, reason: String) -> bool {
        let mut gate = self.lock();
        if gate.state == LoadState::Ready {
            return false;
        }
        gate.state = LoadState::Failed;
        gate.failure = Some(reason);
        self.changed.notify_all();
        true
    }

    fn state(&self) -> LoadState {
        if self.ready.load(Ordering::Acquire) {
            return LoadState::Ready;
        }
        self.lock().state
    }

    fn wait(&self, timeout: Duration) -> Result<(), RegistryError> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let gate = self.lock();
        let (mut gate, _) = self
            .changed
            .wait_timeout_while(gate, timeout, |g| g.state == LoadState::Pending)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match gate.state {
            LoadState::Ready => Ok(()),
            LoadState::Failed => Err(RegistryError::LoadFailed(
                gate.failure.clone().unwrap_or_default(),
            )),
            LoadState::Pending => {
                // Later callers fail fast instead of waiting out the timeout
                // again; a late `open()` still clears this.
                warn!("Filter lists not loaded after {timeout:?}, failing open");
                gate.state = LoadState::Failed;
                gate.failure = Some(format!("filter lists not loaded after {timeout:?}"));
                self.changed.notify_all();
                Err(RegistryError::LoadTimeout(timeout))
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Domain settings for one navigation.
#[derive(Debug, Clone, Serialize)]
pub struct DomainResolution {
    pub host: String,
    pub registrable_domain: String,
    pub record: Option<DomainSettingRecord>,
    pub settings: ResolvedSettings,
}

/// The "filter list health" indicator.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub state: LoadState,
    pub lists: Vec<(ListKind, ListHealth)>,
    pub classification_faults: u64,
    pub domain_settings: usize,
    pub quarantined_settings: usize,
}

pub struct FilterListRegistry {
    lists: ArcSwap<FilterSet>,
    domain_settings: ArcSwap<DomainSettingsTable>,
    globals: ArcSwap<GlobalSettings>,
    suffixes: ArcSwap<SuffixList>,
    gate: LoadGate,
    faults: AtomicU64,
    config: RegistryConfig,
}

impl Default for FilterListRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl FilterListRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            lists: ArcSwap::from_pointee(FilterSet::default()),
            domain_settings: ArcSwap::from_pointee(DomainSettingsTable::default()),
            globals: ArcSwap::from_pointee(GlobalSettings::default()),
            suffixes: ArcSwap::from_pointee(SuffixList::heuristic()),
            gate: LoadGate::new(),
            faults: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // --- filter lists ---

    /// Current list set, without waiting for the initial load.
    pub fn lists(&self) -> Arc<FilterSet> {
        self.lists.load_full()
    }

    /// Replace one list.
    pub fn install(&self, kind: ListKind, list: FilterList) {
        let list = Arc::new(list);
        info!(
            "Installing {kind}: {} block, {} allow rules",
            list.health().block_rules,
            list.health().allow_rules
        );
        self.lists.rcu(|set| set.with_list(kind, Arc::clone(&list)));
    }

    /// Replace the whole list set in one swap.
    pub fn install_all(&self, set: FilterSet) {
        let rules: usize = set.iter().map(|(_, l)| l.health().active_rules()).sum();
        info!("Installing filter set with {rules} active rules");
        self.lists.store(Arc::new(set));
    }

    pub fn mark_loaded(&self) {
        self.gate.open();
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.gate.fail(reason.clone()) {
            warn!("Initial filter list load failed: {reason}");
        } else {
            warn!("Filter list reload failed, keeping previous lists: {reason}");
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.gate.state()
    }

    /// Wait for the initial load, then return the current list set.
    pub fn wait_for_lists(&self) -> Result<Arc<FilterSet>, RegistryError> {
        self.gate.wait(self.config.load_timeout)?;
        Ok(self.lists())
    }

    // --- settings ---

    pub fn domain_settings(&self) -> Arc<DomainSettingsTable> {
        self.domain_settings.load_full()
    }

    pub fn reload_domain_settings(&self, table: DomainSettingsTable) {
        info!(
            "Reloaded domain settings: {} records, {} quarantined",
            table.len(),
            table.quarantined().len()
        );
        self.domain_settings.store(Arc::new(table));
    }

    pub fn globals(&self) -> Arc<GlobalSettings> {
        self.globals.load_full()
    }

    pub fn set_globals(&self, globals: GlobalSettings) {
        self.globals.store(Arc::new(globals));
    }

    pub fn suffix_list(&self) -> Arc<SuffixList> {
        self.suffixes.load_full()
    }

    pub fn set_suffix_list(&self, suffixes: SuffixList) {
        self.suffixes.store(Arc::new(suffixes));
    }

    /// Settings that apply to a top-level navigation to `url`.
    pub fn resolve_domain_settings(&self, url: &str) -> DomainResolution {
        let host = extract_host(url);
        let registrable_domain = self.suffixes.load().registrable_domain(&host);
        let table = self.domain_settings.load();
        let globals = self.globals.load();
        let record = table.resolve(&host).cloned();
        let settings = ResolvedSettings::resolve(record.as_ref(), &globals);

        DomainResolution {
            host,
            registrable_domain,
            record,
            settings,
        }
    }

    // --- health ---

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> RegistryHealth {
        let lists = self.lists.load();
        let table = self.domain_settings.load();
        RegistryHealth {
            state: self.load_state(),
            lists: lists.iter().map(|(kind, l)| (kind, *l.health())).collect(),
            classification_faults: self.faults(),
            domain_settings: table.len(),
            quarantined_settings: table.quarantined().len(),
        }
    }
}
