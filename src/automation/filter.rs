//! Request filtering for rendered sessions
//!
//! Every request a page issues goes through [`RequestFilter::decide`]:
//! ad and tracker hosts are dropped, heavy media and fonts are dropped,
//! playlist-looking URLs are captured, everything else loads normally.

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;

/// Used when the rules do not declare `blockedPatterns`
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    "4rabet",
    "mexc.com",
    "betting",
    "casino",
    "doubleclick",
    "googlesyndication",
    "adservice",
    "popads",
    "popcash",
    "propellerads",
    "exoclick",
    "stske.net",
    "adcash",
    "analytics",
    "tracking",
    "facebook.com",
    "twitter.com",
];

/// Resource types never needed to walk a page's DOM
pub const MEDIA_BLOCKLIST: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".mp4", ".webm", ".mp3", ".woff", ".woff2", ".ttf",
];

lazy_static! {
    static ref MEDIA_URL: Regex = Regex::new(r"(?i)\.(m3u8|mkv|mpd)(\?|#|$|/)").unwrap();
    static ref NOT_MEDIA: Regex = Regex::new(r"(?i)thumb|preview|poster").unwrap();
}

/// True for URLs that look like a playable stream rather than artwork
///
/// Progressive `.mp4` is left out: on ad-heavy pages those are mostly
/// pre-roll clips, and the media blocklist drops them first anyway.
pub fn is_media_url(url: &str) -> bool {
    MEDIA_URL.is_match(url) && !NOT_MEDIA.is_match(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    Block,
    Capture,
}

#[derive(Debug, Clone)]
pub struct RequestFilter {
    blocked: Vec<String>,
}

impl RequestFilter {
    pub fn new(blocked_patterns: Option<&[String]>) -> Self {
        let blocked = match blocked_patterns {
            Some(patterns) => patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            None => DEFAULT_BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect(),
        };
        Self { blocked }
    }

    pub fn decide(&self, url: &str) -> FilterDecision {
        let lower = url.to_lowercase();
        if self.blocked.iter().any(|p| lower.contains(p.as_str())) {
            return FilterDecision::Block;
        }
        if MEDIA_BLOCKLIST.iter().any(|p| lower.contains(p)) {
            return FilterDecision::Block;
        }
        if is_media_url(&lower) {
            return FilterDecision::Capture;
        }
        FilterDecision::Allow
    }
}

/// Filter plus the channel captured URLs are reported on
///
/// Renderers call [`RequestInterceptor::intercept`] for every request and
/// abort it unless the answer is `true`.
#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    filter: RequestFilter,
    captures: mpsc::UnboundedSender<String>,
}

impl RequestInterceptor {
    pub fn new(filter: RequestFilter) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { filter, captures: tx }, rx)
    }

    /// Returns whether the request may proceed
    pub fn intercept(&self, url: &str) -> bool {
        match self.filter.decide(url) {
            FilterDecision::Allow => true,
            FilterDecision::Block => {
                debug!(url = %url, "Blocked request");
                false
            }
            FilterDecision::Capture => {
                debug!(url = %url, "Captured media request");
                let _ = self.captures.send(url.to_string());
                false
            }
        }
    }
}
