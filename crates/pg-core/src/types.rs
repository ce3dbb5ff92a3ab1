//! Core type definitions shared by the compiler, matcher and pipeline.

use serde::{Deserialize, Serialize};

// =============================================================================
// Rule Actions
// =============================================================================

/// What a rule does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleAction {
    /// Exception rule (`@@...`)
    Allow,
    /// Block rule
    Block,
}

/// Where a pattern is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnchorType {
    /// Matches anywhere in the URL
    #[default]
    None,
    /// `|` - matches at the start of the URL
    Start,
    /// `||` - matches at a label boundary of the request host
    Domain,
}

// =============================================================================
// Request Types
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const MAIN_FRAME = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
    }
}

impl RequestType {
    /// Parse a resource type name as reported by the rendering engine or
    /// written in a `$` option. Unknown names are `None`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        let ty = match name {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "ping" | "beacon" => Self::PING,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            "other" => Self::OTHER,
            _ => return None,
        };
        Some(ty)
    }

    /// Name of a single type, as accepted by [`RequestType::from_type_name`].
    /// Masks with several bits set are `"mixed"`.
    pub fn type_name(self) -> &'static str {
        const NAMES: &[(RequestType, &str)] = &[
            (RequestType::MAIN_FRAME, "main_frame"),
            (RequestType::SUBDOCUMENT, "sub_frame"),
            (RequestType::STYLESHEET, "stylesheet"),
            (RequestType::SCRIPT, "script"),
            (RequestType::IMAGE, "image"),
            (RequestType::FONT, "font"),
            (RequestType::OBJECT, "object"),
            (RequestType::XMLHTTPREQUEST, "xmlhttprequest"),
            (RequestType::PING, "ping"),
            (RequestType::MEDIA, "media"),
            (RequestType::WEBSOCKET, "websocket"),
            (RequestType::OTHER, "other"),
        ];
        NAMES
            .iter()
            .find(|&&(ty, _)| ty == self)
            .map_or("mixed", |&(_, name)| name)
    }

    #[inline]
    pub fn is_main_frame(self) -> bool {
        self.contains(Self::MAIN_FRAME)
    }
}

bitflags::bitflags! {
    /// First-party / third-party scoping of a rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PartyMask: u8 {
        const FIRST_PARTY = 1 << 0;
        const THIRD_PARTY = 1 << 1;
    }
}

// =============================================================================
// Filter lists
// =============================================================================

/// The filter lists the pipeline knows about, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    UltraList,
    UltraPrivacy,
    EasyList,
    EasyPrivacy,
    FanboyAnnoyance,
    FanboySocial,
}

impl ListKind {
    pub const ALL: [ListKind; 6] = [
        ListKind::UltraList,
        ListKind::UltraPrivacy,
        ListKind::EasyList,
        ListKind::EasyPrivacy,
        ListKind::FanboyAnnoyance,
        ListKind::FanboySocial,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable list name, used in ledger provenance.
    pub const fn display_name(self) -> &'static str {
        match self {
            ListKind::UltraList => "UltraList",
            ListKind::UltraPrivacy => "UltraPrivacy",
            ListKind::EasyList => "EasyList",
            ListKind::EasyPrivacy => "EasyPrivacy",
            ListKind::FanboyAnnoyance => "Fanboy's Annoyance List",
            ListKind::FanboySocial => "Fanboy's Social Blocking List",
        }
    }

    /// File name the list is stored under by the persistence layer.
    pub const fn file_name(self) -> &'static str {
        match self {
            ListKind::UltraList => "ultralist.txt",
            ListKind::UltraPrivacy => "ultraprivacy.txt",
            ListKind::EasyList => "easylist.txt",
            ListKind::EasyPrivacy => "easyprivacy.txt",
            ListKind::FanboyAnnoyance => "fanboy-annoyance.txt",
            ListKind::FanboySocial => "fanboy-social.txt",
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.file_name().trim_end_matches(".txt") == stem)
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

// =============================================================================
// Dispositions
// =============================================================================

/// Final verdict for one resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// No rule had an opinion
    Default,
    /// An exception rule matched and no list blocked
    Allowed,
    /// A list's block rule matched
    Blocked,
    /// Blocked by the per-domain "block all third-party requests" switch
    ThirdPartyBlocked,
}

/// Grouping of rules shown next to the matched rule in the request log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Unanchored, unscoped pattern
    Main,
    /// Anchored at the start of the URL or at a host label
    Initial,
    /// Anchored at the end of the URL
    Final,
    /// Scoped with `$domain=`
    Domain,
    /// Scoped with `$third-party`
    ThirdParty,
    /// Scoped with both `$third-party` and `$domain=`
    ThirdPartyDomain,
}
