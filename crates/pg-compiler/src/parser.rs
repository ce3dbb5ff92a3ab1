//! Filter list text parser
//!
//! Turns adblock-syntax lines into `FilterRule`s. Only network rules are
//! kept: comments, cosmetic (element hiding) rules and scriptlets are counted
//! and dropped. A line that fails to parse is recorded in
//! `ParsedList::skipped` and never affects the rest of the list.

use std::net::IpAddr;

use log::{debug, warn};
use pg_core::hash::hash_domain;
use pg_core::rule::{DomainConstraint, FilterRule, PatternToken, RuleOptions};
use pg_core::types::{AnchorType, PartyMask, RequestType, RuleAction};

/// Why a single line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("pattern is empty")]
    EmptyPattern,
    #[error("empty option list after `$`")]
    EmptyOptionList,
    #[error("malformed option {0:?}")]
    MalformedOption(String),
    #[error("`domain=` option lists no domains")]
    EmptyDomainOption,
    #[error("invalid domain {0:?}")]
    InvalidDomain(String),
    #[error("resource type options exclude every type")]
    EmptyTypeMask,
    #[error("party options exclude both first and third party")]
    EmptyPartyMask,
    #[error("regular expression rules are not supported")]
    RegexUnsupported,
    #[error("unexpected whitespace in pattern")]
    Whitespace,
}

/// A line the parser rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line: usize,
    pub text: String,
    pub error: RuleError,
}

/// Output of parsing one list.
#[derive(Debug, Default)]
pub struct ParsedList {
    pub rules: Vec<FilterRule>,
    /// Lines in the input
    pub lines: usize,
    pub skipped: Vec<SkippedLine>,
    /// Blank, comment, cosmetic and loopback hosts lines
    pub ignored: usize,
}

const COSMETIC_MARKERS: &[&str] = &["##", "#@#", "#?#", "#@?#", "#$#", "#@$#", "#%#", "#@%#"];

/// Host names in hosts files that are not block targets.
const LOCAL_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
    "0.0.0.0",
];

pub fn parse_filter_list(text: &str) -> ParsedList {
    let mut parsed = ParsedList::default();

    for (idx, raw_line) in text.lines().enumerate() {
        parsed.lines += 1;
        let line_no = idx + 1;

        match parse_rule(raw_line, line_no) {
            Ok(Some(rule)) => parsed.rules.push(rule),
            Ok(None) => parsed.ignored += 1,
            Err(error) => {
                if error == RuleError::RegexUnsupported {
                    debug!("Line {line_no}: skipping {:?}: {error}", raw_line.trim());
                } else {
                    warn!("Line {line_no}: skipping {:?}: {error}", raw_line.trim());
                }
                parsed.skipped.push(SkippedLine {
                    line: line_no,
                    text: raw_line.trim().to_string(),
                    error,
                });
            }
        }
    }

    parsed
}

/// Parse one line. `Ok(None)` means the line is not a network rule.
pub fn parse_rule(raw_line: &str, line_no: usize) -> Result<Option<FilterRule>, RuleError> {
    let line = raw_line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return Ok(None);
    }
    if COSMETIC_MARKERS.iter().any(|m| line.contains(m)) {
        return Ok(None);
    }
    if line.starts_with('#') {
        return Ok(None);
    }

    if let Some(host) = parse_hosts_line(line)? {
        return Ok(host.map(|host| host_rule(host, line, line_no)));
    }

    let (action, body) = match line.strip_prefix("@@") {
        Some(rest) => (RuleAction::Allow, rest),
        None => (RuleAction::Block, line),
    };

    let (pattern_text, options_text) = split_options(body);
    if pattern_text.chars().any(char::is_whitespace) {
        return Err(RuleError::Whitespace);
    }
    if is_regex(&pattern_text) {
        return Err(RuleError::RegexUnsupported);
    }

    let options = match options_text {
        Some(text) => parse_options(text)?,
        None => RuleOptions::default(),
    };

    let pattern = parse_pattern(&pattern_text)?;

    Ok(Some(FilterRule {
        action,
        anchor: pattern.anchor,
        right_anchor: pattern.right_anchor,
        pattern: pattern.tokens,
        host: pattern.host,
        options,
        text: line.to_string(),
        line: line_no,
    }))
}

// =============================================================================
// Hosts files
// =============================================================================

/// `0.0.0.0 ads.example.com`. Returns `Ok(None)` when the line is not a
/// hosts entry, `Ok(Some(None))` for loopback names.
fn parse_hosts_line(line: &str) -> Result<Option<Option<String>>, RuleError> {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    if first.parse::<IpAddr>().is_err() {
        return Ok(None);
    }
    let Some(host) = parts.next() else {
        return Ok(None);
    };

    let host = host.to_ascii_lowercase();
    if LOCAL_HOSTS.contains(&host.as_str()) {
        return Ok(Some(None));
    }
    normalize_domain(&host)
        .map(|host| Some(Some(host)))
        .ok_or(RuleError::InvalidDomain(host))
}

fn host_rule(host: String, line: &str, line_no: usize) -> FilterRule {
    FilterRule {
        action: RuleAction::Block,
        anchor: AnchorType::Domain,
        right_anchor: false,
        pattern: vec![PatternToken::Literal(host.clone()), PatternToken::Separator],
        host: Some(host),
        options: RuleOptions::default(),
        text: line.to_string(),
        line: line_no,
    }
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() || trimmed.split('.').any(str::is_empty) {
        return None;
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

// =============================================================================
// Pattern
// =============================================================================

/// Split on the first unescaped `$`. `\$` in the pattern is a literal `$`.
fn split_options(body: &str) -> (String, Option<&str>) {
    let mut pattern = String::with_capacity(body.len());
    let mut chars = body.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' if matches!(chars.peek(), Some((_, '$'))) => {
                pattern.push('$');
                chars.next();
            }
            '$' => return (pattern, Some(&body[i + 1..])),
            _ => pattern.push(ch),
        }
    }
    (pattern, None)
}

/// `/.../` with regex syntax inside. A plain `/ads/` path pattern is not a
/// regex.
fn is_regex(pattern: &str) -> bool {
    pattern.len() > 2
        && pattern.starts_with('/')
        && pattern.ends_with('/')
        && pattern[1..pattern.len() - 1]
            .chars()
            .any(|c| matches!(c, '\\' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '?' | '|'))
}

struct ParsedPattern {
    anchor: AnchorType,
    right_anchor: bool,
    tokens: Vec<PatternToken>,
    host: Option<String>,
}

fn parse_pattern(text: &str) -> Result<ParsedPattern, RuleError> {
    let (anchor, rest) = if let Some(rest) = text.strip_prefix("||") {
        (AnchorType::Domain, rest)
    } else if let Some(rest) = text.strip_prefix('|') {
        (AnchorType::Start, rest)
    } else {
        (AnchorType::None, text)
    };

    let (right_anchor, rest) = match rest.strip_suffix('|') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };

    let mut tokens = tokenize_pattern(rest);

    // Wildcards at an unanchored edge match nothing extra.
    if anchor == AnchorType::None {
        while tokens.first() == Some(&PatternToken::Wildcard) {
            tokens.remove(0);
        }
    }
    if !right_anchor {
        while tokens.last() == Some(&PatternToken::Wildcard) {
            tokens.pop();
        }
    }

    if tokens.is_empty() || tokens == [PatternToken::Wildcard] {
        return Err(RuleError::EmptyPattern);
    }

    let host = match anchor {
        AnchorType::Domain => index_host(rest),
        _ => None,
    };

    Ok(ParsedPattern {
        anchor,
        right_anchor,
        tokens,
        host,
    })
}

fn tokenize_pattern(text: &str) -> Vec<PatternToken> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for ch in text.chars() {
        let special = match ch {
            '*' => PatternToken::Wildcard,
            '^' => PatternToken::Separator,
            _ => {
                literal.push(ch);
                continue;
            }
        };
        if !literal.is_empty() {
            tokens.push(PatternToken::Literal(std::mem::take(&mut literal)));
        }
        if special == PatternToken::Wildcard && tokens.last() == Some(&PatternToken::Wildcard) {
            continue;
        }
        tokens.push(special);
    }
    if !literal.is_empty() {
        tokens.push(PatternToken::Literal(literal));
    }
    tokens
}

/// Host of a `||host^`, `||host/...` or `||host:port` pattern when it can
/// key the host index: no wildcard, and a terminator that ends the host.
fn index_host(rest: &str) -> Option<String> {
    let end = rest.find(['^', '/', ':', '*', '|', '?'])?;
    if !matches!(rest.as_bytes()[end], b'^' | b'/' | b':') {
        return None;
    }
    let host = &rest[..end];
    if host.starts_with('.') {
        return None;
    }
    normalize_domain(host)
}

// =============================================================================
// Options
// =============================================================================

fn parse_options(text: &str) -> Result<RuleOptions, RuleError> {
    if text.trim().is_empty() {
        return Err(RuleError::EmptyOptionList);
    }

    let mut options = RuleOptions::default();
    let mut type_include = RequestType::empty();
    let mut type_exclude = RequestType::empty();
    let mut party_include = PartyMask::empty();
    let mut party_exclude = PartyMask::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RuleError::MalformedOption(text.to_string()));
        }
        let lower = raw.to_ascii_lowercase();

        if let Some(value) = lower.strip_prefix("domain=") {
            let parsed = parse_domain_option(value)?;
            let constraint = options.domains.get_or_insert_with(DomainConstraint::default);
            constraint.include.extend(parsed.include);
            constraint.exclude.extend(parsed.exclude);
            continue;
        }

        let (negated, name) = match lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };
        if name.is_empty() {
            return Err(RuleError::MalformedOption(raw.to_string()));
        }

        match name {
            "important" | "match-case" if !negated => continue,
            "badfilter" if !negated => {
                options.badfilter = true;
                continue;
            }
            _ => {}
        }

        if let Some(ty) = RequestType::from_type_name(name) {
            if negated {
                type_exclude |= ty;
            } else {
                type_include |= ty;
            }
            continue;
        }

        if let Some(party) = party(name) {
            // `~third-party` is first-party and vice versa.
            if negated {
                party_exclude |= party;
            } else {
                party_include |= party;
            }
            continue;
        }

        options.unsupported.push(raw.to_string());
    }

    options.type_mask = finalize_mask(type_include, type_exclude).ok_or(RuleError::EmptyTypeMask)?;
    options.party = finalize_mask(party_include, party_exclude).ok_or(RuleError::EmptyPartyMask)?;
    Ok(options)
}

/// Resolve include/exclude sets to one mask. `None` when nothing is left;
/// the empty mask when everything is.
fn finalize_mask<F: bitflags::Flags + Copy + PartialEq>(include: F, exclude: F) -> Option<F> {
    let mut mask = if include.is_empty() { F::all() } else { include };
    mask.remove(exclude);
    if mask.is_empty() {
        return None;
    }
    if mask == F::all() {
        return Some(F::empty());
    }
    Some(mask)
}

fn party(name: &str) -> Option<PartyMask> {
    match name {
        "third-party" | "3p" => Some(PartyMask::THIRD_PARTY),
        "first-party" | "1p" => Some(PartyMask::FIRST_PARTY),
        _ => None,
    }
}

fn parse_domain_option(value: &str) -> Result<DomainConstraint, RuleError> {
    let mut constraint = DomainConstraint::default();

    for raw in value.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (exclude, domain) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let domain = normalize_domain(domain).ok_or_else(|| RuleError::InvalidDomain(raw.to_string()))?;
        let hash = hash_domain(&domain);
        if exclude {
            constraint.exclude.push(hash);
        } else {
            constraint.include.push(hash);
        }
    }

    if constraint.include.is_empty() && constraint.exclude.is_empty() {
        return Err(RuleError::EmptyDomainOption);
    }
    Ok(constraint)
}
