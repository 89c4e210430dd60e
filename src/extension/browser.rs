//! Rendered-page bridge exposed to scripts as `browser.get(url)`
//!
//! The bridge itself is an external collaborator (a challenge-solving
//! browser, or the headless [`crate::automation::chromium::ChromiumBridge`]).
//! The host only imports its result: page HTML goes back to the script and
//! any cookies land in the shared [`CookieJar`] so later `network` calls
//! reuse the solved session.

use crate::core::cookies::{host_of, CookieJar};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no rendered-page bridge is configured")]
    Unavailable,

    #[error("rendered-page bridge timed out after {0}ms")]
    Timeout(u64),

    #[error("rendered-page bridge failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserPage {
    pub html: String,
    pub cookies: Option<String>,
    pub current_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    html: String,
    #[serde(default)]
    cookies: Option<String>,
    #[serde(default)]
    current_url: Option<String>,
}

impl BrowserPage {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    /// Accept either a `{html, cookies, currentUrl}` envelope or bare HTML
    pub fn from_envelope(raw: &str) -> Self {
        if raw.trim_start().starts_with('{') {
            match serde_json::from_str::<Envelope>(raw) {
                Ok(env) => {
                    return Self {
                        html: env.html,
                        cookies: env.cookies.filter(|c| !c.trim().is_empty()),
                        current_url: env.current_url.filter(|u| !u.trim().is_empty()),
                    }
                }
                Err(e) => warn!("Bridge result looked like an envelope but did not parse: {}", e),
            }
        }
        Self::from_html(raw)
    }
}

#[async_trait]
pub trait BrowserBridge: Send + Sync {
    async fn render(&self, url: &str) -> Result<BrowserPage, BridgeError>;
}

/// Script-facing browser capability
#[derive(Clone)]
pub struct HostBrowser {
    bridge: Option<Arc<dyn BrowserBridge>>,
    cookies: CookieJar,
    timeout: Duration,
}

impl HostBrowser {
    pub fn new(bridge: Option<Arc<dyn BrowserBridge>>, cookies: CookieJar, timeout: Duration) -> Self {
        Self { bridge, cookies, timeout }
    }

    pub async fn get(&self, url: &str) -> Result<String, BridgeError> {
        let bridge = self.bridge.as_ref().ok_or(BridgeError::Unavailable)?;
        info!(url = %url, "Opening rendered page");

        let page = tokio::time::timeout(self.timeout, bridge.render(url))
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout.as_millis() as u64))??;

        self.import_cookies(url, &page);
        Ok(page.html)
    }

    fn import_cookies(&self, requested_url: &str, page: &BrowserPage) {
        let Some(cookies) = page.cookies.as_deref() else { return };
        let host = page
            .current_url
            .as_deref()
            .and_then(host_of)
            .or_else(|| host_of(requested_url));
        match host {
            Some(host) => {
                debug!(host = %host, "Storing cookies from rendered page");
                self.cookies.set(&host, cookies);
            }
            None => warn!(url = %requested_url, "Could not derive a host for rendered-page cookies"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticBridge;
    use super::*;

    fn host(page: BrowserPage, delay: Duration, jar: &CookieJar) -> HostBrowser {
        HostBrowser::new(
            Some(Arc::new(StaticBridge { page, delay })),
            jar.clone(),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_envelope_parsing() {
        let page = BrowserPage::from_envelope(
            r#"{"html":"<p>ok</p>","cookies":"cf=1","currentUrl":"https://b.example/x"}"#,
        );
        assert_eq!(page.html, "<p>ok</p>");
        assert_eq!(page.cookies.as_deref(), Some("cf=1"));
        assert_eq!(page.current_url.as_deref(), Some("https://b.example/x"));

        assert_eq!(BrowserPage::from_envelope("<html></html>").html, "<html></html>");
        // Looks like JSON but is not an envelope
        assert_eq!(BrowserPage::from_envelope("{broken").html, "{broken");
    }

    #[tokio::test]
    async fn test_cookies_stored_under_final_host() {
        let jar = CookieJar::new();
        let page = BrowserPage::from_envelope(
            r#"{"html":"<p>ok</p>","cookies":"cf=1","currentUrl":"https://final.example/done"}"#,
        );
        let html = host(page, Duration::ZERO, &jar).get("https://start.example/").await.unwrap();

        assert_eq!(html, "<p>ok</p>");
        assert_eq!(jar.get("final.example").as_deref(), Some("cf=1"));
        assert_eq!(jar.get("start.example"), None);
    }

    #[tokio::test]
    async fn test_cookies_fall_back_to_requested_host() {
        let jar = CookieJar::new();
        let page = BrowserPage {
            html: String::new(),
            cookies: Some("a=b".into()),
            current_url: None,
        };
        host(page, Duration::ZERO, &jar).get("https://start.example/").await.unwrap();
        assert_eq!(jar.get("start.example").as_deref(), Some("a=b"));
    }

    #[tokio::test]
    async fn test_slow_bridge_times_out() {
        let jar = CookieJar::new();
        let err = host(BrowserPage::default(), Duration::from_secs(5), &jar)
            .get("https://slow.example/")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(200)));
    }

    #[tokio::test]
    async fn test_missing_bridge() {
        let browser = HostBrowser::new(None, CookieJar::new(), Duration::from_secs(1));
        assert!(matches!(browser.get("https://x.example/").await, Err(BridgeError::Unavailable)));
    }
}
