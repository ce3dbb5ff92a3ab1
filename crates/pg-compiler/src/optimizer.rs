use std::collections::HashSet;

use pg_core::rule::{FilterRule, PatternToken, RuleOptions};
use pg_core::types::{AnchorType, RuleAction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub badfilter_rules: usize,
    pub badfiltered_rules: usize,
}

/// Apply `$badfilter` and drop duplicate rules. The first occurrence of a
/// rule is kept, so line numbers in provenance point at it.
pub fn optimize_rules(rules: &mut Vec<FilterRule>) -> OptimizeStats {
    let before = rules.len();

    let badfilter_rules = rules.iter().filter(|rule| rule.options.badfilter).count();
    let mut deduped = 0usize;
    let mut badfiltered_rules = 0usize;

    // Keys borrow from `rules`, so decide first and filter afterwards.
    let keep: Vec<bool> = {
        let badfilter_keys: HashSet<RuleKey<'_>> = rules
            .iter()
            .filter(|rule| rule.options.badfilter)
            .map(RuleKey::from)
            .collect();
        let mut seen: HashSet<RuleKey<'_>> = HashSet::new();

        let keep = rules
            .iter()
            .map(|rule| {
                if rule.options.badfilter {
                    return false;
                }
                let key = RuleKey::from(rule);
                if badfilter_keys.contains(&key) {
                    badfiltered_rules += 1;
                    return false;
                }
                if !seen.insert(key) {
                    deduped += 1;
                    return false;
                }
                true
            })
            .collect();
        keep
    };

    let mut keep = keep.into_iter();
    rules.retain(|_| keep.next().unwrap_or(false));

    OptimizeStats {
        before,
        after: rules.len(),
        deduped,
        badfilter_rules,
        badfiltered_rules,
    }
}

/// Identity of a rule for deduplication: everything but its text, line and
/// `$badfilter` flag.
#[derive(Debug, PartialEq, Eq, Hash)]
struct RuleKey<'a> {
    action: RuleAction,
    anchor: AnchorType,
    right_anchor: bool,
    pattern: &'a [PatternToken],
    options: RuleOptions,
}

impl<'a> From<&'a FilterRule> for RuleKey<'a> {
    fn from(rule: &'a FilterRule) -> Self {
        let mut options = rule.options.clone();
        options.badfilter = false;
        options.unsupported.sort();
        if let Some(domains) = options.domains.as_mut() {
            domains.include.sort_by_key(|h| h.to_u64());
            domains.exclude.sort_by_key(|h| h.to_u64());
        }
        Self {
            action: rule.action,
            anchor: rule.anchor,
            right_anchor: rule.right_anchor,
            pattern: &rule.pattern,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_filter_list;

    fn optimize(text: &str) -> (Vec<String>, OptimizeStats) {
        let mut rules = parse_filter_list(text).rules;
        let stats = optimize_rules(&mut rules);
        (rules.into_iter().map(|r| r.text).collect(), stats)
    }

    #[test]
    fn test_duplicates_removed() {
        let (rules, stats) = optimize("||ads.com^\n||ads.com^\n@@||ads.com^\n");
        assert_eq!(rules, vec!["||ads.com^", "@@||ads.com^"]);
        assert_eq!(stats.deduped, 1);
        assert_eq!(stats.after, 2);
    }

    #[test]
    fn test_domain_order_does_not_matter() {
        let (rules, stats) =
            optimize("||x.com^$domain=a.com|b.com\n||x.com^$domain=b.com|a.com\n");
        assert_eq!(rules.len(), 1);
        assert_eq!(stats.deduped, 1);
    }

    #[test]
    fn test_badfilter_removes_matching_rules() {
        let (rules, stats) = optimize(
            "||ads.com^$script\n||ads.com^\n||ads.com^$script,badfilter\n||other.com^$badfilter\n",
        );
        assert_eq!(rules, vec!["||ads.com^"]);
        assert_eq!(stats.badfilter_rules, 2);
        assert_eq!(stats.badfiltered_rules, 1);
        assert_eq!(stats.before, 4);
    }

    #[test]
    fn test_badfilter_does_not_cross_actions() {
        let (rules, _) = optimize("@@||ads.com^\n||ads.com^$badfilter\n");
        assert_eq!(rules, vec!["@@||ads.com^"]);
    }
}
