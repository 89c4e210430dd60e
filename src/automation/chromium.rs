//! Headless Chromium implementation of the rendered-page primitives
//!
//! Each [`ChromiumRenderer::open`] launches its own browser process so no
//! navigation state, cookies or storage leak between extraction runs. Every
//! request the page makes is paused through the DevTools Fetch domain and
//! answered from the session's [`RequestInterceptor`].

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::filter::RequestInterceptor;
use super::page::{ElementInfo, PageError, PageSession, Renderer, FALLBACK_BUTTONS};
use crate::core::config::AutomationConfig;
use crate::extension::browser::{BridgeError, BrowserBridge, BrowserPage};

/// Installed before any page script runs
const POPUP_GUARD: &str = r#"
window.open = function () { return null; };
window.alert = function () {};
window.confirm = function () { return false; };
window.prompt = function () { return null; };
"#;

/// Browser process plus the task pumping its DevTools connection
struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl LaunchedBrowser {
    async fn launch(config: &AutomationConfig) -> Result<Self, PageError> {
        let mut builder = BrowserConfig::builder()
            .arg(format!("--user-agent={}", config.user_agent))
            .arg("--mute-audio");
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(PageError::Launch)?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .map_err(|e| PageError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    async fn shutdown(mut self) -> Result<(), PageError> {
        let closed = self.browser.close().await.map_err(renderer_error);
        if closed.is_ok() {
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
        closed.map(|_| ())
    }
}

fn renderer_error(e: impl std::fmt::Display) -> PageError {
    PageError::Renderer(e.to_string())
}

/// Launches a fresh headless browser for every session
pub struct ChromiumRenderer {
    config: AutomationConfig,
}

impl ChromiumRenderer {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open(&self, interceptor: RequestInterceptor) -> Result<Box<dyn PageSession>, PageError> {
        let launched = LaunchedBrowser::launch(&self.config).await?;
        match prepare_page(&launched.browser, interceptor).await {
            Ok((page, interception)) => Ok(Box::new(ChromiumSession {
                launched: Some(launched),
                page,
                interception,
                navigation_timeout: self.config.navigation_timeout(),
            })),
            Err(e) => {
                let _ = launched.shutdown().await;
                Err(e)
            }
        }
    }
}

async fn prepare_page(browser: &Browser, interceptor: RequestInterceptor) -> Result<(Page, JoinHandle<()>), PageError> {
    let page = browser.new_page("about:blank").await.map_err(renderer_error)?;

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(POPUP_GUARD))
        .await
        .map_err(renderer_error)?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(renderer_error)?;
    page.execute(
        EnableParams::builder()
            .pattern(
                RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build(),
            )
            .build(),
    )
    .await
    .map_err(renderer_error)?;

    let responder = page.clone();
    let interception = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let answer = if interceptor.intercept(&event.request.url) {
                responder
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            } else {
                responder
                    .execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = answer {
                debug!(url = %event.request.url, "Failed to answer paused request: {}", e);
            }
        }
    });

    Ok((page, interception))
}

struct ChromiumSession {
    launched: Option<LaunchedBrowser>,
    page: Page,
    interception: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, PageError> {
        self.page
            .evaluate(script)
            .await
            .map_err(renderer_error)?
            .into_value::<T>()
            .map_err(renderer_error)
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        let navigation_error = |message: String| PageError::Navigation {
            url: url.to_string(),
            message,
        };
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(navigation_error(e.to_string())),
            Err(_) => Err(navigation_error(format!(
                "timed out after {}ms",
                self.navigation_timeout.as_millis()
            ))),
        }
    }

    async fn query(&mut self, selector: &str) -> Result<Vec<ElementInfo>, PageError> {
        let script = format!(
            r#"(() => {{
                try {{
                    return Array.from(document.querySelectorAll({selector})).map(el => ({{
                        href: typeof el.href === 'string' && el.href ? el.href : el.getAttribute('href'),
                        src: typeof el.src === 'string' && el.src ? el.src : el.getAttribute('src'),
                        text: el.innerText || el.textContent || '',
                        className: typeof el.className === 'string' ? el.className : '',
                        value: typeof el.value === 'string' ? el.value : null,
                        disabled: !!el.disabled,
                        visible: el.offsetParent !== null,
                    }}));
                }} catch (e) {{
                    return [];
                }}
            }})()"#,
            selector = js_string(selector)
        );
        self.eval(script).await
    }

    async fn page_html(&mut self) -> Result<String, PageError> {
        self.page.content().await.map_err(renderer_error)
    }

    async fn click(&mut self, selector: &str) -> Result<bool, PageError> {
        let script = format!(
            r#"(() => {{
                try {{
                    const el = document.querySelector({selector});
                    if (el && !el.disabled) {{ el.click(); return true; }}
                }} catch (e) {{}}
                return false;
            }})()"#,
            selector = js_string(selector)
        );
        self.eval(script).await
    }

    async fn click_text(&mut self, needles: &[String]) -> Result<bool, PageError> {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        let script = format!(
            r#"(() => {{
                const needles = {needles};
                const buttons = document.querySelectorAll({buttons});
                for (const button of buttons) {{
                    const text = (button.textContent || button.value || '').toLowerCase();
                    if (needles.some(n => text.indexOf(n) !== -1)) {{ button.click(); return true; }}
                }}
                return false;
            }})()"#,
            needles = serde_json::Value::from(needles),
            buttons = js_string(FALLBACK_BUTTONS)
        );
        self.eval(script).await
    }

    async fn close(&mut self) -> Result<(), PageError> {
        self.interception.abort();
        match self.launched.take() {
            Some(launched) => launched.shutdown().await,
            None => Ok(()),
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.interception.abort();
        if let Some(launched) = self.launched.take() {
            warn!("Browser session dropped without close");
            launched.handler.abort();
        }
    }
}

/// [`BrowserBridge`] that renders the page in headless Chromium and returns
/// its final HTML and cookies
pub struct ChromiumBridge {
    config: AutomationConfig,
}

impl ChromiumBridge {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }

    async fn fetch(&self, browser: &Browser, url: &str) -> Result<BrowserPage, PageError> {
        let page = browser.new_page("about:blank").await.map_err(renderer_error)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(POPUP_GUARD))
            .await
            .map_err(renderer_error)?;
        tokio::time::timeout(self.config.navigation_timeout(), page.goto(url))
            .await
            .map_err(|_| PageError::Navigation {
                url: url.to_string(),
                message: "timed out".to_string(),
            })?
            .map_err(|e| PageError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        tokio::time::sleep(self.config.settle_delay()).await;

        let html = page.content().await.map_err(renderer_error)?;
        let current_url = page.url().await.map_err(renderer_error)?;
        let cookies = page
            .get_cookies()
            .await
            .map_err(renderer_error)?
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        Ok(BrowserPage {
            html,
            cookies: Some(cookies).filter(|c| !c.is_empty()),
            current_url,
        })
    }
}

#[async_trait]
impl BrowserBridge for ChromiumBridge {
    async fn render(&self, url: &str) -> Result<BrowserPage, BridgeError> {
        let launched = LaunchedBrowser::launch(&self.config)
            .await
            .map_err(|e| BridgeError::Failed(e.to_string()))?;
        let result = self.fetch(&launched.browser, url).await;
        if let Err(e) = launched.shutdown().await {
            warn!(url = %url, "Failed to close bridge browser: {}", e);
        }
        result.map_err(|e| BridgeError::Failed(e.to_string()))
    }
}
