//! Compiled filter lists
//!
//! A `FilterList` is immutable once built. Block and allow rules live in
//! separate collections, each with its own `RuleIndex` so a request only
//! verifies the rules whose host or token key it actually contains.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hash::{hash_domain, Hash64};
use crate::psl::walk_host_suffixes;
use crate::rule::{FilterRule, RequestContext};

// =============================================================================
// Index
// =============================================================================

/// Where a rule is filed in a `RuleIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKey {
    /// Exact host of a `||host^` rule, looked up by walking the request host
    /// and its parents.
    Host(Hash64),
    /// A token every matching URL must contain.
    Token(u32),
    /// No usable key; verified for every request.
    Generic,
}

/// Fast-reject index over one rule collection.
#[derive(Debug, Default, Clone)]
pub struct RuleIndex {
    by_host: HashMap<u64, Vec<u32>>,
    by_token: HashMap<u32, Vec<u32>>,
    generic: Vec<u32>,
}

impl RuleIndex {
    pub fn insert(&mut self, key: IndexKey, rule: u32) {
        match key {
            IndexKey::Host(hash) => self.by_host.entry(hash.to_u64()).or_default().push(rule),
            IndexKey::Token(token) => self.by_token.entry(token).or_default().push(rule),
            IndexKey::Generic => self.generic.push(rule),
        }
    }

    /// Collect candidate rule ids for a request, sorted and deduplicated.
    pub fn candidates(&self, ctx: &RequestContext<'_>, out: &mut Vec<u32>) {
        out.clear();

        if !self.by_host.is_empty() {
            for suffix in walk_host_suffixes(&ctx.req_host) {
                if let Some(rules) = self.by_host.get(&hash_domain(suffix).to_u64()) {
                    out.extend_from_slice(rules);
                }
            }
        }

        if !self.by_token.is_empty() {
            for token in &ctx.tokens {
                if let Some(rules) = self.by_token.get(token) {
                    out.extend_from_slice(rules);
                }
            }
        }

        out.extend_from_slice(&self.generic);
        out.sort_unstable();
        out.dedup();
    }

    pub fn host_keys(&self) -> usize {
        self.by_host.len()
    }

    pub fn token_keys(&self) -> usize {
        self.by_token.len()
    }

    pub fn generic_rules(&self) -> usize {
        self.generic.len()
    }
}

// =============================================================================
// Health
// =============================================================================

/// Compile statistics for one list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListHealth {
    /// Lines in the source text
    pub lines: usize,
    pub block_rules: usize,
    pub allow_rules: usize,
    /// Rules kept but never matched because of an unsupported option
    pub inert_rules: usize,
    /// Lines rejected by the parser
    pub skipped_lines: usize,
    pub duplicates_removed: usize,
    /// Rules removed by `$badfilter`, including the badfilter rules themselves
    pub badfiltered: usize,
}

impl ListHealth {
    pub fn active_rules(&self) -> usize {
        self.block_rules + self.allow_rules
    }
}

// =============================================================================
// Filter list
// =============================================================================

/// Result of matching one request against one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome<'a> {
    NoMatch,
    Blocked(&'a FilterRule),
    Allowed(&'a FilterRule),
}

impl MatchOutcome<'_> {
    pub fn rule(&self) -> Option<&FilterRule> {
        match self {
            MatchOutcome::NoMatch => None,
            MatchOutcome::Blocked(rule) | MatchOutcome::Allowed(rule) => Some(rule),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct RuleSet {
    rules: Vec<FilterRule>,
    index: RuleIndex,
}

impl RuleSet {
    fn new(entries: Vec<(FilterRule, IndexKey)>) -> Self {
        let mut set = RuleSet::default();
        for (id, (rule, key)) in entries.into_iter().enumerate() {
            set.index.insert(key, id as u32);
            set.rules.push(rule);
        }
        set
    }

    /// Lowest-numbered rule that matches, so results do not depend on
    /// hash map iteration order.
    fn first_match(&self, ctx: &RequestContext<'_>, candidates: &mut Vec<u32>) -> Option<&FilterRule> {
        self.index.candidates(ctx, candidates);
        candidates
            .iter()
            .filter_map(|&id| self.rules.get(id as usize))
            .find(|rule| rule.matches(ctx))
    }
}

/// An immutable compiled rule set for one named list.
#[derive(Debug, Default, Clone)]
pub struct FilterList {
    name: String,
    block: RuleSet,
    allow: RuleSet,
    inert: Vec<FilterRule>,
    health: ListHealth,
}

impl FilterList {
    /// Assemble a list from already indexed rules. Inert rules are stored for
    /// reporting only.
    pub fn from_parts(
        name: impl Into<String>,
        block: Vec<(FilterRule, IndexKey)>,
        allow: Vec<(FilterRule, IndexKey)>,
        inert: Vec<FilterRule>,
        mut health: ListHealth,
    ) -> Self {
        health.block_rules = block.len();
        health.allow_rules = allow.len();
        health.inert_rules = inert.len();
        Self {
            name: name.into(),
            block: RuleSet::new(block),
            allow: RuleSet::new(allow),
            inert,
            health,
        }
    }

    /// A list with no rules.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> &ListHealth {
        &self.health
    }

    pub fn block_rules(&self) -> &[FilterRule] {
        &self.block.rules
    }

    pub fn allow_rules(&self) -> &[FilterRule] {
        &self.allow.rules
    }

    pub fn inert_rules(&self) -> &[FilterRule] {
        &self.inert
    }

    pub fn block_index(&self) -> &RuleIndex {
        &self.block.index
    }

    pub fn allow_index(&self) -> &RuleIndex {
        &self.allow.index
    }

    pub fn is_empty(&self) -> bool {
        self.block.rules.is_empty() && self.allow.rules.is_empty()
    }

    /// Match a request against this list.
    ///
    /// Main-frame requests never match. Exceptions are checked first and
    /// short-circuit the list's block rules.
    pub fn match_request<'s>(&'s self, ctx: &RequestContext<'_>) -> MatchOutcome<'s> {
        self.match_request_with(ctx, &mut Vec::new())
    }

    /// [`FilterList::match_request`] with a caller-owned candidate buffer,
    /// so one request evaluated against several lists allocates once.
    pub fn match_request_with<'s>(&'s self, ctx: &RequestContext<'_>, candidates: &mut Vec<u32>) -> MatchOutcome<'s> {
        if ctx.request_type.is_main_frame() {
            return MatchOutcome::NoMatch;
        }
        if let Some(rule) = self.allow.first_match(ctx, candidates) {
            return MatchOutcome::Allowed(rule);
        }
        if let Some(rule) = self.block.first_match(ctx, candidates) {
            return MatchOutcome::Blocked(rule);
        }
        MatchOutcome::NoMatch
    }
}
