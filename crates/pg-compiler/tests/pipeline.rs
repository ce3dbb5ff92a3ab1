//! End-to-end: compile lists, publish them, navigate a tab and classify.

use std::sync::Arc;

use pg_compiler::{compile, load_lists, MemorySource};
use pg_core::{
    Disposition, DispositionPipeline, DomainSettingRecord, DomainSettingsTable, FilterListRegistry,
    GlobalSettings, ListKind, MatchOutcome, RequestContext, RequestType, ResourceRequest,
    SuffixList, TabSession, TriState,
};

fn registry_with(kind: ListKind, text: &str) -> FilterListRegistry {
    let registry = FilterListRegistry::default();
    registry.install(kind, compile(kind.display_name(), text).unwrap());
    registry.mark_loaded();
    registry
}

fn navigate(registry: &FilterListRegistry, url: &str) -> TabSession {
    let mut session = TabSession::new();
    session.begin_navigation(url, registry);
    session
}

fn classify(registry: &FilterListRegistry, session: &TabSession, url: &str, ty: RequestType) -> Disposition {
    DispositionPipeline::new(registry)
        .classify(session, &ResourceRequest::new(url, ty))
        .disposition
}

#[test]
fn main_frame_requests_are_never_blocked() {
    let registry = registry_with(ListKind::EasyList, "||ads.example.com^\n*\n/ad\n");
    let mut record = DomainSettingRecord::new("*.example.com");
    record.block_all_third_party = TriState::Enabled;
    registry.reload_domain_settings(DomainSettingsTable::new(vec![record]));
    let session = navigate(&registry, "https://www.example.com/");

    for url in [
        "https://ads.example.com/",
        "https://tracker.net/ad",
        "https://other.org/ad/frame.html",
    ] {
        let d = classify(&registry, &session, url, RequestType::MAIN_FRAME);
        assert_eq!(d, Disposition::Default, "{url}");
    }
}

#[test]
fn exact_record_beats_wildcard() {
    let registry = FilterListRegistry::default();
    let mut exact = DomainSettingRecord::new("example.com");
    exact.javascript = TriState::Enabled;
    let mut wildcard = DomainSettingRecord::new("*.example.com");
    wildcard.javascript = TriState::Disabled;
    registry.reload_domain_settings(DomainSettingsTable::new(vec![wildcard, exact]));

    let resolution = registry.resolve_domain_settings("https://example.com/");
    assert_eq!(resolution.record.unwrap().host_pattern, "example.com");
    assert!(resolution.settings.javascript);
}

#[test]
fn wildcard_cascade() {
    let table = DomainSettingsTable::new(vec![DomainSettingRecord::new("*.example.com")]);
    assert_eq!(
        table.resolve("a.b.example.com").map(|r| r.host_pattern.as_str()),
        Some("*.example.com")
    );
    assert!(table.resolve("a.b.other.com").is_none());
}

#[test]
fn exception_short_circuits_its_own_list() {
    let registry = registry_with(ListKind::EasyList, "||cdn.example.com^\n@@||cdn.example.com^\n");
    let session = navigate(&registry, "https://news.com/");
    for path in ["/", "/lib.js", "/img/a.png"] {
        let url = format!("https://cdn.example.com{path}");
        let d = classify(&registry, &session, &url, RequestType::SCRIPT);
        assert_eq!(d, Disposition::Allowed, "{url}");
    }
}

#[test]
fn third_party_option_scoping() {
    let registry = registry_with(ListKind::EasyPrivacy, "||tracker.net^$third-party\n");

    let shop = navigate(&registry, "https://shop.com/");
    assert_eq!(
        classify(&registry, &shop, "https://tracker.net/x.js", RequestType::SCRIPT),
        Disposition::Blocked
    );

    let own = navigate(&registry, "https://tracker.net/");
    assert_eq!(
        classify(&registry, &own, "https://tracker.net/x.js", RequestType::SCRIPT),
        Disposition::Default
    );
}

#[test]
fn recompilation_is_idempotent() {
    let text = "||ads.com^\n@@||ads.com/ok.js\n/banner/*.gif\n||t.net^$third-party,script\n-ad-$domain=news.com\n";
    let a = compile("EasyList", text).unwrap();
    let b = compile("EasyList", text).unwrap();
    let suffixes = SuffixList::heuristic();

    let inputs = [
        ("https://ads.com/x.js", "news.com", RequestType::SCRIPT),
        ("https://ads.com/ok.js", "news.com", RequestType::SCRIPT),
        ("https://cdn.site.org/banner/1/top.gif", "site.org", RequestType::IMAGE),
        ("https://t.net/p.js", "shop.com", RequestType::SCRIPT),
        ("https://t.net/p.png", "shop.com", RequestType::IMAGE),
        ("https://img.net/x-ad-1.png", "news.com", RequestType::IMAGE),
        ("https://img.net/x-ad-1.png", "blog.com", RequestType::IMAGE),
    ];
    for (url, site, ty) in inputs {
        let ctx = RequestContext::new(url, site, ty, &suffixes).unwrap();
        let outcome = |o: MatchOutcome<'_>| match o {
            MatchOutcome::NoMatch => None,
            MatchOutcome::Blocked(r) => Some((true, r.line)),
            MatchOutcome::Allowed(r) => Some((false, r.line)),
        };
        assert_eq!(outcome(a.match_request(&ctx)), outcome(b.match_request(&ctx)), "{url}");
    }
}

#[test]
fn navigation_resets_ledger() {
    let registry = registry_with(ListKind::EasyList, "||ads.com^\n");
    let mut session = navigate(&registry, "https://a.com/");
    classify(&registry, &session, "https://a.com/logo.png", RequestType::IMAGE);
    classify(&registry, &session, "https://ads.com/banner.js", RequestType::SCRIPT);
    assert_eq!(session.ledger().len(), 2);

    session.begin_navigation("https://b.com/", &registry);
    let snapshot = session.ledger().snapshot();
    assert!(snapshot.iter().all(|r| !r.url.starts_with("https://a.com")));
    assert!(snapshot.is_empty());
}

#[test]
fn scenario_exception_inside_blocked_host() {
    let registry = registry_with(
        ListKind::EasyList,
        "||ads.example.com^\n@@||ads.example.com/safe.js\n",
    );
    let session = navigate(&registry, "https://news.com/");
    let pipeline = DispositionPipeline::new(&registry);

    let safe = pipeline.classify(&session, &ResourceRequest::new("https://ads.example.com/safe.js", RequestType::SCRIPT));
    assert_eq!(safe.disposition, Disposition::Allowed);
    let provenance = safe.provenance.unwrap();
    assert_eq!(provenance.list, ListKind::EasyList);
    assert_eq!(provenance.matched_rule_text, "@@||ads.example.com/safe.js");
    assert_eq!(provenance.line, 2);

    let track = pipeline.classify(&session, &ResourceRequest::new("https://ads.example.com/track.js", RequestType::SCRIPT));
    assert_eq!(track.disposition, Disposition::Blocked);
    assert_eq!(track.provenance.unwrap().matched_rule_text, "||ads.example.com^");

    let counters = session.ledger().counters();
    assert_eq!(counters.allowed_by(ListKind::EasyList), 1);
    assert_eq!(counters.blocked_by(ListKind::EasyList), 1);
}

#[test]
fn scenario_tri_state_javascript() {
    let registry = FilterListRegistry::default();
    registry.set_globals(GlobalSettings {
        javascript: true,
        ..GlobalSettings::default()
    });
    let mut record = DomainSettingRecord::new("*.bank.com");
    record.javascript = TriState::Disabled;
    registry.reload_domain_settings(DomainSettingsTable::new(vec![record]));

    assert!(!registry.resolve_domain_settings("https://secure.bank.com/").settings.javascript);
    assert!(registry.resolve_domain_settings("https://bank.org/").settings.javascript);
}

#[test]
fn social_list_runs_only_without_annoyance_list() {
    let registry = FilterListRegistry::default();
    registry.install(ListKind::FanboySocial, compile("social", "||share.net^\n").unwrap());
    registry.mark_loaded();

    let session = navigate(&registry, "https://news.com/");
    assert_eq!(
        classify(&registry, &session, "https://share.net/button.js", RequestType::SCRIPT),
        Disposition::Default
    );

    let mut record = DomainSettingRecord::new("news.com");
    record.filter_lists.insert(ListKind::FanboyAnnoyance, TriState::Disabled);
    registry.reload_domain_settings(DomainSettingsTable::new(vec![record]));
    let session = navigate(&registry, "https://news.com/");
    assert_eq!(
        classify(&registry, &session, "https://share.net/button.js", RequestType::SCRIPT),
        Disposition::Blocked
    );
}

#[tokio::test]
async fn loaded_lists_classify_across_threads() {
    let registry = Arc::new(FilterListRegistry::default());
    let source = MemorySource::new()
        .with_list(ListKind::EasyList, "||ads.com^\n")
        .with_list(ListKind::EasyPrivacy, "||tracker.net^$third-party\n");
    load_lists(Arc::clone(&registry), Arc::new(source)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::task::spawn_blocking(move || {
            let session = navigate(&registry, &format!("https://site{i}.com/"));
            (
                classify(&registry, &session, "https://ads.com/a.js", RequestType::SCRIPT),
                classify(&registry, &session, "https://tracker.net/p.gif", RequestType::IMAGE),
            )
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), (Disposition::Blocked, Disposition::Blocked));
    }
}
