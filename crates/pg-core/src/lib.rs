//! PrivacyGate Core Library
//!
//! This crate decides, for every resource a page fetches, whether the request
//! is allowed, blocked or left alone, and which per-domain settings apply to
//! the page that made it.
//!
//! # Architecture
//!
//! Filter lists are compiled once (see `pg-compiler`) into immutable
//! [`FilterList`]s and published through a [`FilterListRegistry`]. Each tab
//! owns a [`TabSession`] that holds its resolved settings and its
//! [`RequestLedger`]. [`DispositionPipeline::classify`] reads both and never
//! locks on the hot path.
//!
//! # Modules
//!
//! - `hash`: Murmur3 hashes for host and token indexes
//! - `url`: URL slicing and tokenization without a full parse
//! - `psl`: registrable-domain lookup
//! - `types`: shared enums and bit masks
//! - `rule`: compiled rules and pattern matching
//! - `filter_list`: indexed rule sets and list health
//! - `settings`: domain settings table and resolution
//! - `registry`: shared list/settings state and the load gate
//! - `ledger`: per-tab request log and counters
//! - `session`: per-tab navigation state
//! - `pipeline`: per-request classification

pub mod filter_list;
pub mod hash;
pub mod ledger;
pub mod pipeline;
pub mod psl;
pub mod registry;
pub mod rule;
pub mod session;
pub mod settings;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use filter_list::{FilterList, IndexKey, ListHealth, MatchOutcome, RuleIndex};
pub use ledger::{CounterSnapshot, LedgerView, Provenance, RequestLedger, ResourceRequestRecord};
pub use pipeline::{ClassifyError, DispositionPipeline, ResourceRequest};
pub use psl::{PslError, SuffixList};
pub use registry::{
    DomainResolution, FilterListRegistry, FilterSet, LoadState, RegistryConfig, RegistryError,
    RegistryHealth,
};
pub use rule::{DomainConstraint, FilterRule, PatternToken, RequestContext, RuleOptions};
pub use session::TabSession;
pub use settings::{
    DomainSettingRecord, DomainSettingsTable, GlobalSettings, PinStatus, PinnedCertificate,
    ResolvedSettings, SettingsError, TriState, WebViewTheme,
};
pub use types::{AnchorType, Disposition, ListKind, PartyMask, RequestType, RuleAction, RuleCategory};
