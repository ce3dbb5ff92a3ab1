//! Registrable-domain (eTLD+1) lookup
//!
//! A `SuffixList` starts out with a small heuristic table and can be upgraded
//! to the full Public Suffix List at runtime:
//!
//! ```
//! use pg_core::psl::SuffixList;
//!
//! let suffixes = SuffixList::heuristic();
//! assert_eq!(suffixes.registrable_domain("a.b.example.com"), "example.com");
//! assert_eq!(suffixes.registrable_domain("shop.example.co.uk"), "example.co.uk");
//! ```

use std::net::IpAddr;

use publicsuffix::{List, Psl};

/// Error loading public suffix data.
#[derive(Debug, thiserror::Error)]
pub enum PslError {
    #[error("failed to parse public suffix list: {0}")]
    Parse(String),
    #[error("public suffix list contains no rules")]
    Empty,
}

/// Two-label public suffixes recognised when no PSL data is loaded.
const COMMON_TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "me.uk",
    "co.jp", "ne.jp", "or.jp", "ac.jp",
    "co.nz", "net.nz", "org.nz",
    "co.za", "co.in", "co.kr", "co.il",
    "com.au", "net.au", "org.au", "gov.au",
    "com.br", "com.cn", "com.mx", "com.tw", "com.hk", "com.tr", "com.sg",
];

/// Public suffix rules used to compute registrable domains.
#[derive(Default)]
pub struct SuffixList {
    list: Option<List>,
}

impl SuffixList {
    /// Suffix list backed only by the built-in heuristic.
    pub fn heuristic() -> Self {
        Self { list: None }
    }

    /// Parse the text of `public_suffix_list.dat`.
    pub fn from_psl_text(text: &str) -> Result<Self, PslError> {
        if !text
            .lines()
            .map(str::trim)
            .any(|line| !line.is_empty() && !line.starts_with("//"))
        {
            return Err(PslError::Empty);
        }
        let list: List = text.parse().map_err(|e| PslError::Parse(format!("{e:?}")))?;
        Ok(Self { list: Some(list) })
    }

    /// Whether real PSL data is loaded.
    pub fn is_loaded(&self) -> bool {
        self.list.is_some()
    }

    /// Registrable domain of `host`, lowercased.
    ///
    /// IP literals and single-label hosts are their own registrable domain;
    /// the empty host maps to the empty string.
    pub fn registrable_domain(&self, host: &str) -> String {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() || host.parse::<IpAddr>().is_ok() || !host.contains('.') {
            return host;
        }

        if let Some(list) = &self.list {
            if let Some(domain) = list.domain(host.as_bytes()) {
                if let Ok(domain) = std::str::from_utf8(domain.as_bytes()) {
                    return domain.to_string();
                }
            }
            // Host is itself a public suffix (or unknown to the list).
            return host;
        }

        heuristic_domain(&host)
    }

    /// A request is third-party when both sides have a registrable domain
    /// and they differ.
    pub fn is_third_party(&self, site_host: &str, request_host: &str) -> bool {
        let site = self.registrable_domain(site_host);
        if site.is_empty() {
            return false;
        }
        site != self.registrable_domain(request_host)
    }
}

impl std::fmt::Debug for SuffixList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuffixList")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn heuristic_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    if n <= 2 {
        return host.to_string();
    }

    let last_two = &host[host.len() - labels[n - 2].len() - labels[n - 1].len() - 1..];
    let keep = if COMMON_TWO_PART_SUFFIXES.contains(&last_two) { 3 } else { 2 };
    labels[n - keep..].join(".")
}

/// Strip the leftmost label (`a.b.com` → `b.com`).
pub fn parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx + 1 < host.len() => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator over a host and each of its parent domains, most specific first.
pub struct HostSuffixIter<'a> {
    next: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = parent_domain(current);
        Some(current)
    }
}

/// Walk `host`, then every parent domain down to the top-level label.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        next: if host.is_empty() { None } else { Some(host) },
    }
}
