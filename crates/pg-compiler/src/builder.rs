use std::collections::HashMap;

use pg_core::filter_list::{FilterList, IndexKey, ListHealth};
use pg_core::hash::{hash_domain, hash_token};
use pg_core::rule::{FilterRule, PatternToken};
use pg_core::types::{AnchorType, RuleAction};
use pg_core::url::MIN_TOKEN_LEN;

/// Partition rules by action, pick an index key for each, and assemble the
/// list. Rules with unsupported options are kept aside as inert.
pub fn build_filter_list(name: &str, rules: Vec<FilterRule>, health: ListHealth) -> FilterList {
    let mut block = Vec::new();
    let mut allow = Vec::new();
    let mut inert = Vec::new();

    for rule in rules {
        if rule.is_inert() {
            inert.push(rule);
            continue;
        }
        match rule.action {
            RuleAction::Block => block.push(rule),
            RuleAction::Allow => allow.push(rule),
        }
    }

    FilterList::from_parts(name, with_index_keys(block), with_index_keys(allow), inert, health)
}

fn with_index_keys(rules: Vec<FilterRule>) -> Vec<(FilterRule, IndexKey)> {
    let candidates: Vec<Vec<u32>> = rules.iter().map(extract_index_tokens).collect();

    let mut frequency: HashMap<u32, usize> = HashMap::new();
    for tokens in &candidates {
        for &token in tokens {
            *frequency.entry(token).or_default() += 1;
        }
    }

    rules
        .into_iter()
        .zip(candidates)
        .map(|(rule, tokens)| {
            let key = index_key(&rule, &tokens, &frequency);
            (rule, key)
        })
        .collect()
}

fn index_key(rule: &FilterRule, tokens: &[u32], frequency: &HashMap<u32, usize>) -> IndexKey {
    if let Some(host) = &rule.host {
        return IndexKey::Host(hash_domain(host));
    }
    tokens
        .iter()
        .min_by_key(|token| frequency.get(token).copied().unwrap_or(0))
        .map_or(IndexKey::Generic, |&token| IndexKey::Token(token))
}

/// Hashes of the alphanumeric runs every matching URL must contain as whole
/// runs. A run touching a wildcard or an unanchored edge could be part of a
/// longer run in the URL, so it cannot be a key.
pub fn extract_index_tokens(rule: &FilterRule) -> Vec<u32> {
    let mut tokens = Vec::new();
    let pattern = &rule.pattern;

    for (i, token) in pattern.iter().enumerate() {
        let PatternToken::Literal(literal) = token else {
            continue;
        };
        let bytes = literal.as_bytes();

        let left_bounded = match i.checked_sub(1).map(|p| &pattern[p]) {
            Some(PatternToken::Separator) => true,
            Some(_) => false,
            None => rule.anchor != AnchorType::None,
        };
        let right_bounded = match pattern.get(i + 1) {
            Some(PatternToken::Separator) => true,
            Some(_) => false,
            None => rule.right_anchor,
        };

        let mut start = 0;
        while start < bytes.len() {
            if !bytes[start].is_ascii_alphanumeric() {
                start += 1;
                continue;
            }
            let end = bytes[start..]
                .iter()
                .position(|b| !b.is_ascii_alphanumeric())
                .map_or(bytes.len(), |len| start + len);

            let safe_left = start > 0 || left_bounded;
            let safe_right = end < bytes.len() || right_bounded;
            if safe_left && safe_right && end - start >= MIN_TOKEN_LEN {
                let hash = hash_token(&bytes[start..end]);
                if !tokens.contains(&hash) {
                    tokens.push(hash);
                }
            }
            start = end;
        }
    }

    tokens
}
