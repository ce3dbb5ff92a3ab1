//! Fast URL slicing for the hot path
//!
//! Requests are never fully parsed. `UrlParts` records the byte offsets the
//! matcher needs (host range, start of the path) and everything else works on
//! slices of the original string.

use crate::hash::hash_token;

/// Byte offsets into a URL string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlParts {
    /// Offset just past `scheme:` (or `scheme://` for hierarchical URLs).
    pub scheme_end: usize,
    pub host_start: usize,
    pub host_end: usize,
    /// Offset of the first `/`, `?` or `#` after the authority, or the URL length.
    /// Everything before it is compared case-insensitively.
    pub path_start: usize,
}

impl UrlParts {
    /// Slice a hierarchical URL (`scheme://authority/...`).
    ///
    /// Returns `None` when there is no `://` separator.
    pub fn parse(url: &str) -> Option<Self> {
        let bytes = url.as_bytes();
        let colon = bytes.iter().position(|&b| b == b':')?;
        if colon == 0 || bytes.get(colon + 1..colon + 3) != Some(&b"//"[..]) {
            return None;
        }
        let authority_start = colon + 3;

        let path_start = bytes[authority_start..]
            .iter()
            .position(|&b| b == b'/' || b == b'?' || b == b'#')
            .map_or(bytes.len(), |i| authority_start + i);

        let authority = &bytes[authority_start..path_start];
        let host_start = authority
            .iter()
            .rposition(|&b| b == b'@')
            .map_or(authority_start, |i| authority_start + i + 1);

        let host_end = if bytes.get(host_start) == Some(&b'[') {
            // Bracketed IPv6 literal, keep the brackets out of the host.
            bytes[host_start..path_start]
                .iter()
                .position(|&b| b == b']')
                .map_or(path_start, |i| host_start + i + 1)
        } else {
            bytes[host_start..path_start]
                .iter()
                .position(|&b| b == b':')
                .map_or(path_start, |i| host_start + i)
        };

        Some(Self {
            scheme_end: authority_start,
            host_start,
            host_end,
            path_start,
        })
    }

    #[inline]
    pub fn host<'a>(&self, url: &'a str) -> &'a str {
        let host = &url[self.host_start..self.host_end];
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    #[inline]
    pub fn path<'a>(&self, url: &'a str) -> &'a str {
        &url[self.path_start..]
    }
}

/// Scheme of a URL, lowercased, without the trailing `:`.
pub fn scheme(url: &str) -> Option<String> {
    let colon = url.find(':')?;
    let scheme = &url[..colon];
    if scheme.is_empty()
        || !scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

/// Whether the URL is fetched over the network and therefore subject to
/// filtering. `data:`, `blob:`, `about:` and friends are not.
pub fn is_network_scheme(url: &str) -> bool {
    matches!(
        scheme(url).as_deref(),
        Some("http" | "https" | "ws" | "wss" | "ftp")
    )
}

/// Extract the lowercased host of a URL, or of a bare hostname.
pub fn extract_host(url_or_host: &str) -> String {
    match UrlParts::parse(url_or_host) {
        Some(parts) => parts.host(url_or_host).to_ascii_lowercase(),
        None if !url_or_host.contains(':') && !url_or_host.contains('/') => {
            url_or_host.trim_end_matches('.').to_ascii_lowercase()
        }
        None => String::new(),
    }
}

// =============================================================================
// Tokenization
// =============================================================================

/// Shortest alphanumeric run used as an index key.
pub const MIN_TOKEN_LEN: usize = 2;

/// Tokens past this count are not looked up in the index.
const MAX_URL_TOKENS: usize = 64;

/// Hash every alphanumeric run of the URL that is long enough to be an
/// index key. Duplicates are removed.
pub fn tokenize_url(url: &str) -> Vec<u32> {
    let mut tokens = Vec::with_capacity(16);
    for run in alnum_runs(url.as_bytes()) {
        if run.len() < MIN_TOKEN_LEN {
            continue;
        }
        let hash = hash_token(run);
        if !tokens.contains(&hash) {
            tokens.push(hash);
            if tokens.len() == MAX_URL_TOKENS {
                break;
            }
        }
    }
    tokens
}

/// Maximal runs of ASCII alphanumerics.
pub fn alnum_runs(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|b| !b.is_ascii_alphanumeric())
        .filter(|run| !run.is_empty())
}

// =============================================================================
// Separator
// =============================================================================

/// Adblock `^` separator class: anything but a letter, a digit, or one of
/// `_ - . %`.
#[inline]
pub fn is_separator(b: u8) -> bool {
    !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'%'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let url = "https://example.com/path?q=1";
        let parts = UrlParts::parse(url).unwrap();
        assert_eq!(parts.host(url), "example.com");
        assert_eq!(parts.path(url), "/path?q=1");
        assert_eq!(parts.scheme_end, 8);
    }

    #[test]
    fn test_parse_port_and_userinfo() {
        let url = "https://user:pw@Example.com:8443/x";
        let parts = UrlParts::parse(url).unwrap();
        assert_eq!(parts.host(url), "Example.com");
        assert_eq!(parts.path(url), "/x");
    }

    #[test]
    fn test_parse_without_path() {
        let url = "https://example.com";
        let parts = UrlParts::parse(url).unwrap();
        assert_eq!(parts.host(url), "example.com");
        assert_eq!(parts.path_start, url.len());

        let url = "https://example.com?x";
        assert_eq!(UrlParts::parse(url).unwrap().host(url), "example.com");
    }

    #[test]
    fn test_parse_ipv6() {
        let url = "http://[::1]:8080/a";
        let parts = UrlParts::parse(url).unwrap();
        assert_eq!(parts.host(url), "::1");
    }

    #[test]
    fn test_parse_rejects_opaque() {
        assert!(UrlParts::parse("data:text/plain,hi").is_none());
        assert!(UrlParts::parse("example.com").is_none());
    }

    #[test]
    fn test_network_scheme() {
        assert!(is_network_scheme("HTTPS://example.com"));
        assert!(is_network_scheme("wss://example.com/socket"));
        assert!(!is_network_scheme("data:image/png;base64,AAAA"));
        assert!(!is_network_scheme("blob:https://example.com/uuid"));
        assert!(!is_network_scheme("about:blank"));
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://WWW.Example.com/a"), "www.example.com");
        assert_eq!(extract_host("Example.com."), "example.com");
        assert_eq!(extract_host("about:blank"), "");
    }

    #[test]
    fn test_tokenize_url() {
        let tokens = tokenize_url("https://ads.example.com/banner/ad.js?x=1");
        assert!(tokens.contains(&hash_token(b"banner")));
        assert!(tokens.contains(&hash_token(b"ads")));
        assert!(tokens.contains(&hash_token(b"js")));
        // Single characters are never index keys.
        assert!(!tokens.contains(&hash_token(b"x")));
    }

    #[test]
    fn test_separator_class() {
        assert!(is_separator(b'/'));
        assert!(is_separator(b'?'));
        assert!(is_separator(b':'));
        assert!(!is_separator(b'.'));
        assert!(!is_separator(b'-'));
        assert!(!is_separator(b'%'));
        assert!(!is_separator(b'a'));
    }
}
