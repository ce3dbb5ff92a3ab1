//! Compiled network filter rules and the per-request match context.

use crate::hash::{hash_domain, Hash64};
use crate::psl::{walk_host_suffixes, SuffixList};
use crate::types::{AnchorType, PartyMask, RequestType, RuleAction, RuleCategory};
use crate::url::{is_separator, tokenize_url, UrlParts};

// =============================================================================
// Pattern
// =============================================================================

/// One element of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternToken {
    /// Literal text. Compared case-insensitively inside the scheme and
    /// authority of the URL, case-sensitively in the path and query.
    Literal(String),
    /// `*` - any run of characters, including none
    Wildcard,
    /// `^` - one separator character, or the end of the URL
    Separator,
}

/// `$domain=` scoping. Entries are hashes of the listed domains; a page
/// matches an entry when its host equals it or is a subdomain of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DomainConstraint {
    pub include: Vec<Hash64>,
    pub exclude: Vec<Hash64>,
}

impl DomainConstraint {
    pub fn allows(&self, site_host: &str) -> bool {
        let mut included = self.include.is_empty();
        for suffix in walk_host_suffixes(site_host) {
            let hash = hash_domain(suffix);
            if self.exclude.contains(&hash) {
                return false;
            }
            if !included && self.include.contains(&hash) {
                included = true;
            }
        }
        included
    }
}

/// Options parsed from the `$...` suffix of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RuleOptions {
    /// Resource types the rule applies to. Empty means every type.
    pub type_mask: RequestType,
    /// Party scoping. Empty means both parties.
    pub party: PartyMask,
    pub domains: Option<DomainConstraint>,
    /// `$badfilter`: cancels the identical rule without this option.
    pub badfilter: bool,
    /// Options this engine does not understand, kept verbatim.
    pub unsupported: Vec<String>,
}

// =============================================================================
// Filter rule
// =============================================================================

/// A single compiled network rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub action: RuleAction,
    pub anchor: AnchorType,
    /// Pattern ends with `|`.
    pub right_anchor: bool,
    pub pattern: Vec<PatternToken>,
    /// Exact host of a `||host^` or `||host/` rule, lowercased. Used as the
    /// index key; rules with wildcards in the host part leave this empty.
    pub host: Option<String>,
    pub options: RuleOptions,
    /// Original rule text, for provenance.
    pub text: String,
    /// 1-based line number in the source list.
    pub line: usize,
}

impl FilterRule {
    /// A rule with an option this engine cannot evaluate never matches.
    #[inline]
    pub fn is_inert(&self) -> bool {
        !self.options.unsupported.is_empty()
    }

    pub fn category(&self) -> RuleCategory {
        let third_party = self.options.party == PartyMask::THIRD_PARTY;
        match (third_party, self.options.domains.is_some()) {
            (true, true) => RuleCategory::ThirdPartyDomain,
            (true, false) => RuleCategory::ThirdParty,
            (false, true) => RuleCategory::Domain,
            (false, false) if self.anchor != AnchorType::None => RuleCategory::Initial,
            (false, false) if self.right_anchor => RuleCategory::Final,
            (false, false) => RuleCategory::Main,
        }
    }

    /// Canonical pattern text (anchors included, options excluded).
    pub fn pattern_text(&self) -> String {
        let mut out = String::new();
        match self.anchor {
            AnchorType::None => {}
            AnchorType::Start => out.push('|'),
            AnchorType::Domain => out.push_str("||"),
        }
        for token in &self.pattern {
            match token {
                PatternToken::Literal(lit) => out.push_str(lit),
                PatternToken::Wildcard => out.push('*'),
                PatternToken::Separator => out.push('^'),
            }
        }
        if self.right_anchor {
            out.push('|');
        }
        out
    }

    /// Full check of this rule against a request.
    pub fn matches(&self, ctx: &RequestContext<'_>) -> bool {
        !self.is_inert() && self.options_match(ctx) && self.pattern_matches(ctx)
    }

    fn options_match(&self, ctx: &RequestContext<'_>) -> bool {
        let opts = &self.options;

        if !opts.type_mask.is_empty() && !opts.type_mask.intersects(ctx.request_type) {
            return false;
        }

        if !opts.party.is_empty() {
            let party = if ctx.is_third_party {
                PartyMask::THIRD_PARTY
            } else {
                PartyMask::FIRST_PARTY
            };
            if !opts.party.contains(party) {
                return false;
            }
        }

        match &opts.domains {
            Some(constraint) => constraint.allows(&ctx.site_host),
            None => true,
        }
    }

    fn pattern_matches(&self, ctx: &RequestContext<'_>) -> bool {
        let url = ctx.url.as_bytes();
        let m = Matcher {
            url,
            ci_end: ctx.parts.path_start,
            right_anchor: self.right_anchor,
        };

        // Split at the first wildcard: the head is tied to the anchor, the
        // rest floats.
        let (head, tail) = match self.pattern.iter().position(|t| *t == PatternToken::Wildcard) {
            Some(i) => (&self.pattern[..i], Some(&self.pattern[i + 1..])),
            None => (&self.pattern[..], None),
        };

        match self.anchor {
            AnchorType::Start => m.anchored(head, tail, std::iter::once(0)),
            AnchorType::Domain => {
                let (start, end) = (ctx.parts.host_start, ctx.parts.host_end);
                let starts = std::iter::once(start).chain((start..end).filter(|&i| url[i] == b'.').map(|i| i + 1));
                m.anchored(head, tail, starts)
            }
            AnchorType::None => m.anchored(head, tail, 0..=url.len()),
        }
    }
}

struct Matcher<'u> {
    url: &'u [u8],
    ci_end: usize,
    right_anchor: bool,
}

impl Matcher<'_> {
    /// Match `head` at the first start that fits, then the wildcard-separated
    /// remainder from where it ended.
    fn anchored(
        &self,
        head: &[PatternToken],
        tail: Option<&[PatternToken]>,
        mut starts: impl Iterator<Item = usize>,
    ) -> bool {
        match tail {
            None => starts.any(|pos| self.segment_at(head, pos).is_some_and(|end| self.ends_ok(end))),
            Some(tail) => starts
                .find_map(|pos| self.segment_at(head, pos))
                .is_some_and(|end| self.floating(tail, end)),
        }
    }

    /// Greedy left-to-right scan: each segment takes its leftmost placement
    /// at or after the previous one's end. `*` consumes nothing itself.
    fn floating(&self, tokens: &[PatternToken], mut cursor: usize) -> bool {
        let mut segments = tokens.split(|t| *t == PatternToken::Wildcard).peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            if segment.is_empty() {
                if last {
                    return true;
                }
                continue;
            }
            let to_end = last && self.right_anchor;
            let found = (cursor..=self.url.len())
                .find_map(|pos| self.segment_at(segment, pos).filter(|&end| !to_end || end == self.url.len()));
            match found {
                Some(end) => cursor = end,
                None => return false,
            }
        }
        self.ends_ok(cursor)
    }

    #[inline]
    fn ends_ok(&self, end: usize) -> bool {
        !self.right_anchor || end == self.url.len()
    }

    /// Match a wildcard-free run of tokens starting exactly at `pos`.
    /// Returns the end offset.
    fn segment_at(&self, segment: &[PatternToken], mut pos: usize) -> Option<usize> {
        for token in segment {
            match token {
                PatternToken::Literal(lit) => {
                    if !self.literal_at(lit.as_bytes(), pos) {
                        return None;
                    }
                    pos += lit.len();
                }
                // `^` also matches the end of the URL, consuming nothing.
                PatternToken::Separator => {
                    if pos < self.url.len() {
                        if !is_separator(self.url[pos]) {
                            return None;
                        }
                        pos += 1;
                    }
                }
                PatternToken::Wildcard => return None,
            }
        }
        Some(pos)
    }

    fn literal_at(&self, lit: &[u8], pos: usize) -> bool {
        let Some(window) = self.url.get(pos..pos + lit.len()) else {
            return false;
        };
        window.iter().zip(lit).enumerate().all(|(i, (&u, &l))| {
            if pos + i < self.ci_end {
                u.eq_ignore_ascii_case(&l)
            } else {
                u == l
            }
        })
    }
}

// =============================================================================
// Request context
// =============================================================================

/// Everything a filter list needs to know about one request. Built once per
/// request and shared by every list that evaluates it.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub url: &'a str,
    pub parts: UrlParts,
    /// Request host, lowercased
    pub req_host: String,
    pub req_domain: String,
    /// Host of the top-level page, lowercased
    pub site_host: String,
    pub site_domain: String,
    pub is_third_party: bool,
    pub request_type: RequestType,
    /// Hashed URL tokens for the rule index
    pub tokens: Vec<u32>,
}

impl<'a> RequestContext<'a> {
    /// Build a context for `url` loaded by a page on `site_host`.
    ///
    /// Returns `None` when the URL has no host to match against.
    pub fn new(
        url: &'a str,
        site_host: &str,
        request_type: RequestType,
        suffixes: &SuffixList,
    ) -> Option<Self> {
        let site_host = site_host.to_ascii_lowercase();
        let site_domain = suffixes.registrable_domain(&site_host);
        Self::with_site_domain(url, site_host, site_domain, request_type, suffixes)
    }

    /// Like [`RequestContext::new`] when the page's registrable domain is
    /// already known.
    pub fn with_site_domain(
        url: &'a str,
        site_host: String,
        site_domain: String,
        request_type: RequestType,
        suffixes: &SuffixList,
    ) -> Option<Self> {
        let parts = UrlParts::parse(url)?;
        let req_host = parts.host(url).trim_end_matches('.').to_ascii_lowercase();
        if req_host.is_empty() {
            return None;
        }
        let req_domain = suffixes.registrable_domain(&req_host);
        let is_third_party = !site_domain.is_empty() && site_domain != req_domain;

        Some(Self {
            url,
            parts,
            req_host,
            req_domain,
            site_host,
            site_domain,
            is_third_party,
            request_type,
            tokens: tokenize_url(url),
        })
    }
}
