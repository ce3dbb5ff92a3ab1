//! Per-request disposition
//!
//! `DispositionPipeline::classify` runs for every subresource a page fetches.
//! Order of evaluation:
//!
//! 1. The page's own document and main-frame requests are never filtered.
//! 2. Non-network schemes (`data:`, `blob:`, ...) are never filtered.
//! 3. "Block all third-party requests" short-circuits for third-party hosts.
//! 4. Each enabled list runs in priority order. The first block is final;
//!    the first exception is remembered and reported if nothing blocks.
//!
//! Any internal failure degrades to `Disposition::Default` and is counted as
//! a fault on both the tab ledger and the registry.

use log::{error, trace};

use crate::filter_list::MatchOutcome;
use crate::ledger::{Provenance, ResourceRequestRecord};
use crate::registry::{FilterListRegistry, RegistryError};
use crate::rule::{FilterRule, RequestContext};
use crate::session::TabSession;
use crate::types::{Disposition, ListKind, RequestType};
use crate::url::is_network_scheme;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("network URL without a host: {0}")]
    MalformedUrl(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A subresource request reported by the rendering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest<'a> {
    pub url: &'a str,
    pub request_type: RequestType,
}

impl<'a> ResourceRequest<'a> {
    pub fn new(url: &'a str, request_type: RequestType) -> Self {
        Self { url, request_type }
    }
}

fn provenance(kind: ListKind, rule: &FilterRule) -> Provenance {
    Provenance {
        list: kind,
        list_name: kind.display_name().to_string(),
        subscription_list_index: kind.index(),
        category: rule.category(),
        line: rule.line,
        matched_rule_text: rule.text.clone(),
    }
}

/// Classifies requests against a registry. Cheap to construct; holds only a
/// borrow of the registry.
#[derive(Clone, Copy)]
pub struct DispositionPipeline<'r> {
    registry: &'r FilterListRegistry,
}

impl<'r> DispositionPipeline<'r> {
    pub fn new(registry: &'r FilterListRegistry) -> Self {
        Self { registry }
    }

    /// Classify one request and append the result to the tab's ledger.
    pub fn classify(&self, session: &TabSession, request: &ResourceRequest<'_>) -> ResourceRequestRecord {
        let (disposition, provenance) = match self.evaluate(session, request) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("Classification fault for {}: {e}", request.url);
                session.ledger().record_fault();
                self.registry.record_fault();
                (Disposition::Default, None)
            }
        };

        trace!("{:?} {} -> {disposition:?}", request.request_type, request.url);

        let record = ResourceRequestRecord {
            disposition,
            url: request.url.to_string(),
            request_type: request.request_type,
            provenance,
        };
        session.ledger().append(record.clone());
        record
    }

    fn evaluate(
        &self,
        session: &TabSession,
        request: &ResourceRequest<'_>,
    ) -> Result<(Disposition, Option<Provenance>), ClassifyError> {
        if request.url == session.current_url() || request.request_type.is_main_frame() {
            return Ok((Disposition::Default, None));
        }
        if !is_network_scheme(request.url) {
            return Ok((Disposition::Default, None));
        }

        let suffixes = self.registry.suffix_list();
        let ctx = RequestContext::with_site_domain(
            request.url,
            session.current_host().to_string(),
            session.current_registrable_domain().to_string(),
            request.request_type,
            &suffixes,
        )
        .ok_or_else(|| ClassifyError::MalformedUrl(request.url.to_string()))?;

        if session.block_all_third_party() && ctx.is_third_party {
            return Ok((Disposition::ThirdPartyBlocked, None));
        }

        let lists = self.registry.wait_for_lists()?;
        let mut allowed = None;
        let mut candidates = Vec::with_capacity(64);
        for kind in session.settings().active_lists() {
            match lists.get(kind).match_request_with(&ctx, &mut candidates) {
                MatchOutcome::Blocked(rule) => {
                    return Ok((Disposition::Blocked, Some(provenance(kind, rule))));
                }
                MatchOutcome::Allowed(rule) if allowed.is_none() => {
                    allowed = Some(provenance(kind, rule));
                }
                _ => {}
            }
        }

        Ok(match allowed {
            Some(p) => (Disposition::Allowed, Some(p)),
            None => (Disposition::Default, None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_list::{FilterList, IndexKey, ListHealth};
    use crate::hash::hash_domain;
    use crate::registry::RegistryConfig;
    use crate::rule::{PatternToken, RuleOptions};
    use crate::settings::{DomainSettingRecord, DomainSettingsTable, TriState};
    use crate::types::{AnchorType, RuleAction};
    use std::time::Duration;

    fn host_rule(action: RuleAction, host: &str) -> (FilterRule, IndexKey) {
        let prefix = if action == RuleAction::Allow { "@@" } else { "" };
        let rule = FilterRule {
            action,
            anchor: AnchorType::Domain,
            right_anchor: false,
            pattern: vec![PatternToken::Literal(host.to_string()), PatternToken::Separator],
            host: Some(host.to_string()),
            options: RuleOptions::default(),
            text: format!("{prefix}||{host}^"),
            line: 1,
        };
        (rule, IndexKey::Host(hash_domain(host)))
    }

    fn list(block: &[&str], allow: &[&str]) -> FilterList {
        FilterList::from_parts(
            "test",
            block.iter().map(|h| host_rule(RuleAction::Block, h)).collect(),
            allow.iter().map(|h| host_rule(RuleAction::Allow, h)).collect(),
            Vec::new(),
            ListHealth::default(),
        )
    }

    fn loaded_registry() -> FilterListRegistry {
        let registry = FilterListRegistry::default();
        registry.install(ListKind::UltraList, list(&[], &["cdn.ads.com"]));
        registry.install(ListKind::EasyList, list(&["ads.com"], &[]));
        registry.install(ListKind::EasyPrivacy, list(&["tracker.net"], &[]));
        registry.mark_loaded();
        registry
    }

    fn session_on(registry: &FilterListRegistry, url: &str) -> TabSession {
        let mut session = TabSession::new();
        session.begin_navigation(url, registry);
        session
    }

    #[test]
    fn test_later_list_block_overrides_earlier_exception() {
        let registry = loaded_registry();
        let session = session_on(&registry, "https://news.com/");
        let pipeline = DispositionPipeline::new(&registry);

        let record = pipeline.classify(&session, &ResourceRequest::new("https://cdn.ads.com/a.js", RequestType::SCRIPT));
        assert_eq!(record.disposition, Disposition::Blocked);
        assert_eq!(record.provenance.unwrap().list, ListKind::EasyList);
    }

    #[test]
    fn test_exception_reported_when_nothing_blocks() {
        let registry = FilterListRegistry::default();
        registry.install(ListKind::UltraList, list(&[], &["cdn.example.com"]));
        registry.mark_loaded();
        let session = session_on(&registry, "https://news.com/");

        let record = DispositionPipeline::new(&registry)
            .classify(&session, &ResourceRequest::new("https://cdn.example.com/lib.js", RequestType::SCRIPT));
        assert_eq!(record.disposition, Disposition::Allowed);
        let provenance = record.provenance.unwrap();
        assert_eq!(provenance.subscription_list_index, 0);
        assert_eq!(provenance.matched_rule_text, "@@||cdn.example.com^");
    }

    #[test]
    fn test_page_document_and_main_frame_are_default() {
        let registry = loaded_registry();
        let session = session_on(&registry, "https://ads.com/");
        let pipeline = DispositionPipeline::new(&registry);

        let own = pipeline.classify(&session, &ResourceRequest::new("https://ads.com/", RequestType::SUBDOCUMENT));
        assert_eq!(own.disposition, Disposition::Default);
        let frame = pipeline.classify(&session, &ResourceRequest::new("https://ads.com/next", RequestType::MAIN_FRAME));
        assert_eq!(frame.disposition, Disposition::Default);
        let data = pipeline.classify(&session, &ResourceRequest::new("data:image/png;base64,AA", RequestType::IMAGE));
        assert_eq!(data.disposition, Disposition::Default);
        assert_eq!(session.ledger().len(), 3);
    }

    #[test]
    fn test_block_all_third_party() {
        let registry = loaded_registry();
        let mut record = DomainSettingRecord::new("shop.com");
        record.block_all_third_party = TriState::Enabled;
        registry.reload_domain_settings(DomainSettingsTable::new(vec![record]));
        let session = session_on(&registry, "https://shop.com/");
        let pipeline = DispositionPipeline::new(&registry);

        let third = pipeline.classify(&session, &ResourceRequest::new("https://cdn.other.org/x.css", RequestType::STYLESHEET));
        assert_eq!(third.disposition, Disposition::ThirdPartyBlocked);
        let first = pipeline.classify(&session, &ResourceRequest::new("https://img.shop.com/x.png", RequestType::IMAGE));
        assert_eq!(first.disposition, Disposition::Default);
        assert_eq!(session.ledger().counters().third_party_blocked, 1);
    }

    #[test]
    fn test_disabled_list_is_skipped() {
        let registry = loaded_registry();
        let mut record = DomainSettingRecord::new("news.com");
        record.filter_lists.insert(ListKind::EasyPrivacy, TriState::Disabled);
        registry.reload_domain_settings(DomainSettingsTable::new(vec![record]));
        let session = session_on(&registry, "https://news.com/");

        let r = DispositionPipeline::new(&registry)
            .classify(&session, &ResourceRequest::new("https://tracker.net/t.js", RequestType::SCRIPT));
        assert_eq!(r.disposition, Disposition::Default);
    }

    #[test]
    fn test_faults_fail_open() {
        let registry = FilterListRegistry::new(RegistryConfig {
            load_timeout: Duration::from_millis(10),
        });
        let session = session_on(&registry, "https://news.com/");
        let pipeline = DispositionPipeline::new(&registry);

        // Lists never loaded.
        let r = pipeline.classify(&session, &ResourceRequest::new("https://ads.com/a.js", RequestType::SCRIPT));
        assert_eq!(r.disposition, Disposition::Default);

        // Network scheme without a host.
        registry.mark_loaded();
        let r = pipeline.classify(&session, &ResourceRequest::new("https:///nohost", RequestType::SCRIPT));
        assert_eq!(r.disposition, Disposition::Default);

        assert_eq!(session.ledger().counters().faults, 2);
        assert_eq!(registry.faults(), 2);
        assert_eq!(session.ledger().len(), 2);
    }
}
