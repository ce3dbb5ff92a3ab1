//! Per-domain setting overrides
//!
//! The persistence layer stores one `DomainSettingRecord` per configured host
//! pattern. A pattern is either an exact host (`news.example.com`) or a
//! wildcard (`*.example.com`) covering a domain and all of its subdomains.
//! `DomainSettingsTable::resolve` picks the record that applies to a host;
//! `ResolvedSettings` folds it over the `GlobalSettings` so every feature has
//! a concrete value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::psl::walk_host_suffixes;
use crate::types::ListKind;

/// Errors from loading or querying domain settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid host pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
    #[error("host pattern {0:?} is configured more than once")]
    Ambiguous(String),
}

// =============================================================================
// Values
// =============================================================================

/// A per-domain feature switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    /// Use the global default
    #[default]
    SystemDefault,
    Enabled,
    Disabled,
}

impl TriState {
    #[inline]
    pub fn resolve(self, default: bool) -> bool {
        match self {
            TriState::SystemDefault => default,
            TriState::Enabled => true,
            TriState::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebViewTheme {
    #[default]
    SystemDefault,
    Light,
    Dark,
}

/// Certificate fields a user pinned for a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PinnedCertificate {
    pub issued_to_common_name: String,
    pub issued_to_organization: String,
    pub issued_to_unit: String,
    pub issued_by_common_name: String,
    pub issued_by_organization: String,
    pub issued_by_unit: String,
    /// Validity start, milliseconds since the Unix epoch
    pub start_date: i64,
    pub end_date: i64,
}

/// One row of the domain settings table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSettingRecord {
    /// `host` or `*.domain`
    pub host_pattern: String,
    pub javascript: TriState,
    pub cookies: TriState,
    pub dom_storage: TriState,
    pub block_all_third_party: TriState,
    pub wide_viewport: TriState,
    pub display_images: TriState,
    /// Lists not mentioned use the global default.
    pub filter_lists: BTreeMap<ListKind, TriState>,
    /// User agent name; `None` uses the global one.
    pub user_agent: Option<String>,
    pub font_size_percent: Option<u16>,
    pub webview_theme: WebViewTheme,
    pub pinned_certificate: Option<PinnedCertificate>,
    pub pinned_ip_addresses: Option<Vec<IpAddr>>,
}

impl DomainSettingRecord {
    pub fn new(host_pattern: impl Into<String>) -> Self {
        Self {
            host_pattern: host_pattern.into(),
            ..Self::default()
        }
    }

    pub fn list(&self, kind: ListKind) -> TriState {
        self.filter_lists.get(&kind).copied().unwrap_or_default()
    }
}

/// Process-wide defaults for every feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub javascript: bool,
    pub cookies: bool,
    pub dom_storage: bool,
    pub block_all_third_party: bool,
    pub wide_viewport: bool,
    pub display_images: bool,
    pub filter_lists: BTreeMap<ListKind, bool>,
    pub user_agent: String,
    pub font_size_percent: u16,
    pub webview_theme: WebViewTheme,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            javascript: false,
            cookies: false,
            dom_storage: false,
            block_all_third_party: false,
            wide_viewport: true,
            display_images: true,
            filter_lists: ListKind::ALL.into_iter().map(|kind| (kind, true)).collect(),
            user_agent: "default".to_string(),
            font_size_percent: 100,
            webview_theme: WebViewTheme::SystemDefault,
        }
    }
}

impl GlobalSettings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Lists missing from the map are enabled.
    pub fn list_enabled(&self, kind: ListKind) -> bool {
        self.filter_lists.get(&kind).copied().unwrap_or(true)
    }
}

// =============================================================================
// Resolved view
// =============================================================================

/// Outcome of checking a connection against a domain's pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinStatus {
    NotPinned,
    Match,
    CertificateMismatch,
    IpAddressMismatch,
}

/// Every feature resolved to a concrete value for one navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub domain_settings_applied: bool,
    /// Pattern of the record that applied
    pub host_pattern: Option<String>,
    pub javascript: bool,
    pub cookies: bool,
    pub dom_storage: bool,
    pub block_all_third_party: bool,
    pub wide_viewport: bool,
    pub display_images: bool,
    pub filter_lists: BTreeMap<ListKind, bool>,
    pub user_agent: String,
    pub font_size_percent: u16,
    pub webview_theme: WebViewTheme,
    pub pinned_certificate: Option<PinnedCertificate>,
    pub pinned_ip_addresses: Option<Vec<IpAddr>>,
}

impl ResolvedSettings {
    pub fn from_globals(globals: &GlobalSettings) -> Self {
        Self::resolve(None, globals)
    }

    pub fn resolve(record: Option<&DomainSettingRecord>, globals: &GlobalSettings) -> Self {
        let Some(record) = record else {
            return Self {
                domain_settings_applied: false,
                host_pattern: None,
                javascript: globals.javascript,
                cookies: globals.cookies,
                dom_storage: globals.dom_storage,
                block_all_third_party: globals.block_all_third_party,
                wide_viewport: globals.wide_viewport,
                display_images: globals.display_images,
                filter_lists: ListKind::ALL
                    .into_iter()
                    .map(|kind| (kind, globals.list_enabled(kind)))
                    .collect(),
                user_agent: globals.user_agent.clone(),
                font_size_percent: globals.font_size_percent,
                webview_theme: globals.webview_theme,
                pinned_certificate: None,
                pinned_ip_addresses: None,
            };
        };

        Self {
            domain_settings_applied: true,
            host_pattern: Some(record.host_pattern.clone()),
            javascript: record.javascript.resolve(globals.javascript),
            cookies: record.cookies.resolve(globals.cookies),
            dom_storage: record.dom_storage.resolve(globals.dom_storage),
            block_all_third_party: record
                .block_all_third_party
                .resolve(globals.block_all_third_party),
            wide_viewport: record.wide_viewport.resolve(globals.wide_viewport),
            display_images: record.display_images.resolve(globals.display_images),
            filter_lists: ListKind::ALL
                .into_iter()
                .map(|kind| (kind, record.list(kind).resolve(globals.list_enabled(kind))))
                .collect(),
            user_agent: record
                .user_agent
                .clone()
                .unwrap_or_else(|| globals.user_agent.clone()),
            font_size_percent: record.font_size_percent.unwrap_or(globals.font_size_percent),
            webview_theme: match record.webview_theme {
                WebViewTheme::SystemDefault => globals.webview_theme,
                theme => theme,
            },
            pinned_certificate: record.pinned_certificate.clone(),
            pinned_ip_addresses: record.pinned_ip_addresses.clone(),
        }
    }

    pub fn list_enabled(&self, kind: ListKind) -> bool {
        self.filter_lists.get(&kind).copied().unwrap_or(false)
    }

    /// Lists to evaluate, in priority order. The social list only runs when
    /// the annoyance list, which contains it, is off.
    pub fn active_lists(&self) -> impl Iterator<Item = ListKind> + '_ {
        let annoyance = self.list_enabled(ListKind::FanboyAnnoyance);
        ListKind::ALL.into_iter().filter(move |&kind| match kind {
            ListKind::FanboySocial => !annoyance && self.list_enabled(kind),
            _ => self.list_enabled(kind),
        })
    }

    /// Compare a connection with the pinned certificate and IP addresses.
    /// The IP check compares sets, so order and duplicates do not matter.
    pub fn verify_pins(
        &self,
        presented_certificate: Option<&PinnedCertificate>,
        resolved_ips: &[IpAddr],
    ) -> PinStatus {
        if self.pinned_certificate.is_none() && self.pinned_ip_addresses.is_none() {
            return PinStatus::NotPinned;
        }

        if let Some(pinned) = &self.pinned_certificate {
            if presented_certificate != Some(pinned) {
                return PinStatus::CertificateMismatch;
            }
        }

        if let Some(pinned) = &self.pinned_ip_addresses {
            let pinned: HashSet<&IpAddr> = pinned.iter().collect();
            let resolved: HashSet<&IpAddr> = resolved_ips.iter().collect();
            if pinned != resolved {
                return PinStatus::IpAddressMismatch;
            }
        }

        PinStatus::Match
    }
}

// =============================================================================
// Table
// =============================================================================

enum Pattern {
    Exact(String),
    /// Domain after the `*.` prefix
    Wildcard(String),
}

/// Normalize and validate a stored host pattern.
fn parse_pattern(raw: &str) -> Result<Pattern, SettingsError> {
    let invalid = |reason| SettingsError::InvalidPattern {
        pattern: raw.to_string(),
        reason,
    };

    let lower = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let (wildcard, host) = match lower.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, lower.as_str()),
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    if host.contains('*') {
        return Err(invalid("wildcards are only allowed as a leading `*.`"));
    }
    if host.split('.').any(str::is_empty) {
        return Err(invalid("empty label"));
    }
    if !host
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
    {
        return Err(invalid("unexpected character"));
    }

    Ok(if wildcard {
        Pattern::Wildcard(host.to_string())
    } else {
        Pattern::Exact(host.to_string())
    })
}

/// The domain settings table, indexed for cascade lookups.
#[derive(Debug, Default, Clone)]
pub struct DomainSettingsTable {
    records: Vec<DomainSettingRecord>,
    exact: HashMap<String, usize>,
    wildcard: HashMap<String, usize>,
    /// Normalized patterns that appear more than once
    ambiguous: HashSet<String>,
    quarantined: Vec<String>,
}

impl DomainSettingsTable {
    /// Build the table. Rows with invalid patterns are quarantined.
    pub fn new(records: Vec<DomainSettingRecord>) -> Self {
        let mut table = Self::default();

        for record in records {
            let pattern = match parse_pattern(&record.host_pattern) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!("Quarantining domain settings row: {e}");
                    table.quarantined.push(record.host_pattern);
                    continue;
                }
            };

            let (map, key, display) = match pattern {
                Pattern::Exact(host) => (&mut table.exact, host.clone(), host),
                Pattern::Wildcard(domain) => {
                    let display = format!("*.{domain}");
                    (&mut table.wildcard, domain, display)
                }
            };

            if map.contains_key(&key) {
                warn!("Domain settings pattern {display:?} is configured more than once");
                table.ambiguous.insert(display);
                continue;
            }
            map.insert(key, table.records.len());
            table.records.push(record);
        }

        table
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let records: Vec<DomainSettingRecord> = serde_json::from_str(text)?;
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DomainSettingRecord] {
        &self.records
    }

    /// Patterns rejected at build time.
    pub fn quarantined(&self) -> &[String] {
        &self.quarantined
    }

    /// Cascade lookup: exact host first, then `*.host`, then `*.parent` for
    /// each parent domain. Stops at a duplicated pattern.
    pub fn lookup(&self, host: &str) -> Result<Option<&DomainSettingRecord>, SettingsError> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Ok(None);
        }

        if self.ambiguous.contains(&host) {
            return Err(SettingsError::Ambiguous(host));
        }
        if let Some(&idx) = self.exact.get(&host) {
            return Ok(self.records.get(idx));
        }

        for suffix in walk_host_suffixes(&host) {
            let pattern = format!("*.{suffix}");
            if self.ambiguous.contains(&pattern) {
                return Err(SettingsError::Ambiguous(pattern));
            }
            if let Some(&idx) = self.wildcard.get(suffix) {
                debug!("Host {host} uses domain settings {pattern}");
                return Ok(self.records.get(idx));
            }
        }

        Ok(None)
    }

    /// Record that applies to `host`, if any. An ambiguous match yields no
    /// override.
    pub fn resolve(&self, host: &str) -> Option<&DomainSettingRecord> {
        match self.lookup(host) {
            Ok(record) => record,
            Err(e) => {
                error!("Domain settings for {host} not applied: {e}");
                None
            }
        }
    }

    pub fn resolve_settings(&self, host: &str, globals: &GlobalSettings) -> ResolvedSettings {
        ResolvedSettings::resolve(self.resolve(host), globals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(patterns: &[&str]) -> DomainSettingsTable {
        DomainSettingsTable::new(patterns.iter().map(|p| DomainSettingRecord::new(*p)).collect())
    }

    fn pattern_of<'a>(table: &'a DomainSettingsTable, host: &str) -> Option<&'a str> {
        table.resolve(host).map(|r| r.host_pattern.as_str())
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let t = table(&["*.example.com", "example.com"]);
        assert_eq!(pattern_of(&t, "example.com"), Some("example.com"));
        assert_eq!(pattern_of(&t, "www.example.com"), Some("*.example.com"));
    }

    #[test]
    fn test_cascade() {
        let t = table(&["*.example.com"]);
        assert_eq!(pattern_of(&t, "a.b.example.com"), Some("*.example.com"));
        assert_eq!(pattern_of(&t, "example.com"), Some("*.example.com"));
        assert_eq!(pattern_of(&t, "a.b.other.com"), None);
        assert_eq!(pattern_of(&t, "notexample.com"), None);
        assert_eq!(pattern_of(&t, ""), None);
    }

    #[test]
    fn test_closest_wildcard_wins() {
        let t = table(&["*.example.com", "*.shop.example.com"]);
        assert_eq!(pattern_of(&t, "cart.shop.example.com"), Some("*.shop.example.com"));
        assert_eq!(pattern_of(&t, "blog.example.com"), Some("*.example.com"));
    }

    #[test]
    fn test_order_independent() {
        let a = table(&["example.com", "*.example.com", "*.b.example.com"]);
        let b = table(&["*.b.example.com", "*.example.com", "example.com"]);
        for host in ["example.com", "a.example.com", "x.b.example.com", "b.example.com"] {
            assert_eq!(pattern_of(&a, host), pattern_of(&b, host));
        }
    }

    #[test]
    fn test_invalid_patterns_quarantined() {
        let t = table(&["", "*.", "ads.*.com", "a..com", "ok.com"]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.quarantined().len(), 4);
        assert_eq!(pattern_of(&t, "OK.com."), Some("ok.com"));
    }

    #[test]
    fn test_duplicate_pattern_fails_closed() {
        let t = table(&["*.example.com", "*.Example.com", "site.com", "site.com"]);
        assert!(matches!(t.lookup("a.example.com"), Err(SettingsError::Ambiguous(_))));
        assert!(t.resolve("a.example.com").is_none());
        assert!(t.resolve("site.com").is_none());
    }

    #[test]
    fn test_tri_state_scenario() {
        let mut record = DomainSettingRecord::new("*.bank.com");
        record.javascript = TriState::Disabled;
        let t = DomainSettingsTable::new(vec![record]);
        let globals = GlobalSettings {
            javascript: true,
            ..GlobalSettings::default()
        };

        let secure = t.resolve_settings("secure.bank.com", &globals);
        assert!(!secure.javascript);
        assert!(secure.domain_settings_applied);
        assert_eq!(secure.host_pattern.as_deref(), Some("*.bank.com"));

        let other = t.resolve_settings("bank.org", &globals);
        assert!(other.javascript);
        assert!(!other.domain_settings_applied);
    }

    #[test]
    fn test_value_fields_fall_back_to_globals() {
        let mut record = DomainSettingRecord::new("example.com");
        record.webview_theme = WebViewTheme::Dark;
        record.filter_lists.insert(ListKind::EasyList, TriState::Disabled);
        let globals = GlobalSettings::default();
        let resolved = ResolvedSettings::resolve(Some(&record), &globals);
        assert_eq!(resolved.user_agent, globals.user_agent);
        assert_eq!(resolved.font_size_percent, 100);
        assert_eq!(resolved.webview_theme, WebViewTheme::Dark);
        assert!(!resolved.list_enabled(ListKind::EasyList));
        assert!(resolved.list_enabled(ListKind::EasyPrivacy));
    }

    #[test]
    fn test_social_list_only_without_annoyance() {
        let globals = GlobalSettings::default();
        let all: Vec<ListKind> = ResolvedSettings::from_globals(&globals).active_lists().collect();
        assert_eq!(all.last(), Some(&ListKind::FanboyAnnoyance));
        assert!(!all.contains(&ListKind::FanboySocial));

        let mut record = DomainSettingRecord::new("example.com");
        record.filter_lists.insert(ListKind::FanboyAnnoyance, TriState::Disabled);
        let lists: Vec<ListKind> = ResolvedSettings::resolve(Some(&record), &globals)
            .active_lists()
            .collect();
        assert_eq!(lists.last(), Some(&ListKind::FanboySocial));
        assert_eq!(lists.len(), 5);
    }

    #[test]
    fn test_from_json_partial_rows() {
        let t = DomainSettingsTable::from_json(
            r#"[{"host_pattern": "*.bank.com", "javascript": "disabled",
                 "filter_lists": {"easy_list": "enabled"},
                 "pinned_ip_addresses": ["93.184.216.34"]}]"#,
        )
        .unwrap();
        let record = t.resolve("www.bank.com").unwrap();
        assert_eq!(record.javascript, TriState::Disabled);
        assert_eq!(record.cookies, TriState::SystemDefault);
        assert_eq!(record.list(ListKind::EasyList), TriState::Enabled);

        assert!(matches!(
            DomainSettingsTable::from_json("{not json"),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn test_verify_pins() {
        let globals = GlobalSettings::default();
        assert_eq!(
            ResolvedSettings::from_globals(&globals).verify_pins(None, &[]),
            PinStatus::NotPinned
        );

        let cert = PinnedCertificate {
            issued_to_common_name: "bank.com".to_string(),
            ..PinnedCertificate::default()
        };
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let mut record = DomainSettingRecord::new("bank.com");
        record.pinned_certificate = Some(cert.clone());
        record.pinned_ip_addresses = Some(vec![ip]);
        let resolved = ResolvedSettings::resolve(Some(&record), &globals);

        assert_eq!(resolved.verify_pins(Some(&cert), &[ip, ip]), PinStatus::Match);
        assert_eq!(resolved.verify_pins(None, &[ip]), PinStatus::CertificateMismatch);
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(
            resolved.verify_pins(Some(&cert), &[ip, other]),
            PinStatus::IpAddressMismatch
        );
    }
}
