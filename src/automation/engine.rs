//! Extraction Automation Engine
//!
//! Walks an [`AutomationRules`] step list through one rendered session and
//! returns the links it found. The engine never fails across its public
//! boundary: timeouts, cancellation and page errors all end in a (possibly
//! empty) link list, and the session is closed exactly once per run.
//! Closing counts against the overall timeout: a close that cannot finish
//! inside the budget is abandoned and the session is dropped.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filter::{RequestFilter, RequestInterceptor};
use super::page::{ElementInfo, PageError, PageSession, Renderer};
use super::rules::{AutomationRules, Step, WaitAndClick};
use crate::core::config::AutomationConfig;
use crate::extension::models::ExtractedLink;

/// Label given to links captured from background requests
pub const CAPTURE_LABEL: &str = "Stream";

const TITLE_LIMIT: usize = 60;
const ELEMENT_POLL: Duration = Duration::from_millis(500);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref SERVER_LABEL: Regex = Regex::new(r"\[(.+?)\]").unwrap();
    static ref QUALITY: Regex = Regex::new(r"(?i)2160p|1080p|720p|480p|360p|4k").unwrap();
    static ref PLAYLIST_URL: Regex = Regex::new(r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#).unwrap();
}

/// Slice of the overall budget held back for closing the session
fn close_reserve(budget: Duration) -> Duration {
    CLOSE_TIMEOUT.min(budget / 10)
}

/// Resolution label mentioned in a link's text, lowercased
pub fn quality_of(text: &str) -> Option<String> {
    QUALITY.find(text).map(|m| m.as_str().to_lowercase())
}

/// How a run ended
#[derive(Debug)]
enum Outcome {
    Completed(Vec<ExtractedLink>),
    Captured(String),
    Failed(PageError),
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct AutomationEngine {
    renderer: Arc<dyn Renderer>,
    config: AutomationConfig,
}

impl AutomationEngine {
    pub fn new(renderer: Arc<dyn Renderer>, config: AutomationConfig) -> Self {
        Self { renderer, config }
    }

    /// Run `rules` starting at `url` until completion, capture, timeout or
    /// cancellation
    pub async fn extract(&self, url: &str, rules: &AutomationRules, cancel: CancellationToken) -> Vec<ExtractedLink> {
        if rules.steps.is_empty() {
            debug!(url = %url, "No steps to run");
            return Vec::new();
        }

        let started = Instant::now();
        let budget = self.config.overall_timeout();
        let deadline = started + budget;
        let (interceptor, captures) = RequestInterceptor::new(RequestFilter::new(rules.blocked_patterns.as_deref()));
        let mut slot: Option<Box<dyn PageSession>> = None;

        let outcome = {
            let run = self.run(url, &rules.steps, interceptor, captures, &mut slot);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                result = tokio::time::timeout(budget - close_reserve(budget), run) => {
                    result.unwrap_or(Outcome::TimedOut)
                }
            }
        };

        if let Some(mut session) = slot.take() {
            let close_budget = deadline.saturating_duration_since(Instant::now()).min(CLOSE_TIMEOUT);
            match tokio::time::timeout(close_budget, session.close()).await {
                Ok(Ok(())) => debug!(url = %url, "Session closed"),
                Ok(Err(e)) => warn!(url = %url, "Failed to close session: {}", e),
                Err(_) => warn!(url = %url, "Timed out closing session"),
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Outcome::Completed(links) => {
                info!(url = %url, count = links.len(), elapsed_ms, "Extraction completed");
                links
            }
            Outcome::Captured(media) => {
                info!(url = %url, media = %media, elapsed_ms, "Extraction captured media request");
                vec![ExtractedLink {
                    quality: quality_of(&media),
                    url: media,
                    title: CAPTURE_LABEL.to_string(),
                    server: CAPTURE_LABEL.to_string(),
                }]
            }
            Outcome::Failed(e) => {
                warn!(url = %url, elapsed_ms, "Extraction failed: {}", e);
                Vec::new()
            }
            Outcome::TimedOut => {
                warn!(url = %url, timeout_ms = self.config.overall_timeout_ms, "Extraction timed out");
                Vec::new()
            }
            Outcome::Cancelled => {
                info!(url = %url, elapsed_ms, "Extraction cancelled");
                Vec::new()
            }
        }
    }

    /// Start an extraction in the background
    pub fn spawn(&self, url: impl Into<String>, rules: AutomationRules) -> ExtractionHandle {
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let url = url.into();
        let token = cancel.clone();
        let task = tokio::spawn(async move { engine.extract(&url, &rules, token).await });
        ExtractionHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(
        &self,
        url: &str,
        steps: &[Step],
        interceptor: RequestInterceptor,
        mut captures: mpsc::UnboundedReceiver<String>,
        slot: &mut Option<Box<dyn PageSession>>,
    ) -> Outcome {
        let session = match self.renderer.open(interceptor).await {
            Ok(session) => slot.insert(session),
            Err(e) => return Outcome::Failed(e),
        };

        let mut walker = Walker::new(session, &self.config);
        let outcome = tokio::select! {
            biased;
            Some(media) = captures.recv() => return Outcome::Captured(media),
            result = walker.run(url, steps) => result,
        };

        // A capture racing the last step still wins
        if let Ok(media) = captures.try_recv() {
            return Outcome::Captured(media);
        }
        match outcome {
            Ok(links) => Outcome::Completed(links),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Handle to a background extraction
///
/// Dropping the handle without joining cancels the run.
pub struct ExtractionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Vec<ExtractedLink>>>,
}

impl ExtractionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    pub async fn join(mut self) -> Vec<ExtractedLink> {
        let Some(task) = self.task.take() else {
            return Vec::new();
        };
        match task.await {
            Ok(links) => links,
            Err(e) => {
                warn!("Extraction task failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl Drop for ExtractionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Whether the walk goes on after a step
enum Flow {
    Next,
    Stop,
}

/// Per-session step state: current page plus accumulated links
struct Walker<'a> {
    page: &'a mut Box<dyn PageSession>,
    settle: Duration,
    links: Vec<ExtractedLink>,
    seen: HashSet<String>,
}

impl<'a> Walker<'a> {
    fn new(page: &'a mut Box<dyn PageSession>, config: &AutomationConfig) -> Self {
        Self {
            page,
            settle: config.settle_delay(),
            links: Vec::new(),
            seen: HashSet::new(),
        }
    }

    async fn run(&mut self, url: &str, steps: &[Step]) -> Result<Vec<ExtractedLink>, PageError> {
        self.goto(url).await?;

        for (index, step) in steps.iter().enumerate() {
            debug!(step = index, action = step.action(), "Running step");
            match self.step(step).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    warn!(step = index, action = step.action(), "Step failed: {}", e);
                    break;
                }
            }
        }

        Ok(std::mem::take(&mut self.links))
    }

    async fn step(&mut self, step: &Step) -> Result<Flow, PageError> {
        match step {
            Step::ExtractUrl { selectors, patterns } => self.extract_url(selectors, patterns).await,
            Step::ExtractLinks {
                selectors,
                exclude_patterns,
                server_patterns,
            } => {
                self.extract_links(selectors, exclude_patterns, server_patterns).await?;
                Ok(Flow::Next)
            }
            Step::WaitAndClick(params) => {
                self.wait_and_click(params).await?;
                Ok(Flow::Next)
            }
            Step::WaitForElement { selector, timeout } => {
                self.wait_for_element(selector, *timeout).await?;
                Ok(Flow::Next)
            }
            Step::ClickElement { selectors } => {
                self.click_element(selectors).await?;
                Ok(Flow::Next)
            }
            Step::ExtractVideoUrl {
                selectors,
                patterns,
                server,
            } => self.extract_video_url(selectors, patterns, server.as_deref()).await,
            Step::Complete => Ok(Flow::Stop),
            Step::Unknown(action) => {
                warn!(action = %action, "Skipping unknown action");
                Ok(Flow::Next)
            }
        }
    }

    async fn goto(&mut self, url: &str) -> Result<(), PageError> {
        self.page.navigate(url).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn extract_url(&mut self, selectors: &[String], patterns: &[String]) -> Result<Flow, PageError> {
        let mut target = None;
        for selector in selectors {
            let found = self.page.query(selector).await?;
            if let Some(href) = found.into_iter().next().and_then(|el| el.href).filter(|h| is_absolute(h)) {
                target = Some(href);
                break;
            }
        }

        if target.is_none() && !patterns.is_empty() {
            let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
            target = self.page.query("a").await?.into_iter().find_map(|el| {
                let href = el.href.filter(|h| is_absolute(h))?;
                let href_lower = href.to_lowercase();
                let text = el.text.to_lowercase();
                patterns
                    .iter()
                    .any(|p| href_lower.contains(p.as_str()) || text.contains(p.as_str()))
                    .then_some(href)
            });
        }

        match target {
            Some(href) => {
                debug!(url = %href, "Following extracted URL");
                self.goto(&href).await?;
                Ok(Flow::Next)
            }
            None => {
                debug!("No URL matched, ending with links collected so far");
                Ok(Flow::Stop)
            }
        }
    }

    async fn extract_links(
        &mut self,
        selectors: &[String],
        exclude_patterns: &[String],
        server_patterns: &[String],
    ) -> Result<(), PageError> {
        let excludes: Vec<String> = exclude_patterns.iter().map(|p| p.to_lowercase()).collect();
        let servers: Vec<String> = server_patterns.iter().map(|p| p.to_lowercase()).collect();
        let before = self.links.len();

        for selector in selectors {
            for el in self.page.query(selector).await? {
                let Some(href) = el.href.clone().filter(|h| is_absolute(h)) else { continue };
                if self.seen.contains(&href) {
                    continue;
                }
                let href_lower = href.to_lowercase();
                if excludes.iter().any(|p| href_lower.contains(p.as_str())) {
                    continue;
                }

                let text = el.text.trim();
                let label = SERVER_LABEL
                    .captures(text)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string());
                let listed = servers.is_empty() || servers.iter().any(|p| href_lower.contains(p.as_str()));
                if !(listed || has_primary_class(&el) || label.is_some()) {
                    continue;
                }

                self.seen.insert(href.clone());
                self.links.push(ExtractedLink {
                    title: text.chars().take(TITLE_LIMIT).collect(),
                    server: label.unwrap_or_else(|| "Download".to_string()),
                    quality: quality_of(text),
                    url: href,
                });
            }
        }

        debug!(found = self.links.len() - before, "Collected links");
        Ok(())
    }

    async fn wait_and_click(&mut self, params: &WaitAndClick) -> Result<(), PageError> {
        let ready = if params.wait_for_text.is_some() || params.wait_for_selector.is_some() {
            let mut ready = false;
            for attempt in 0..=params.max_retries {
                if self.is_ready(params).await? {
                    ready = true;
                    break;
                }
                if attempt < params.max_retries {
                    tokio::time::sleep(params.retry_interval).await;
                }
            }
            if !ready {
                warn!(max_retries = params.max_retries, "Wait condition never met, clicking anyway");
            }
            ready
        } else {
            true
        };

        if ready {
            tokio::time::sleep(params.wait).await;
        }

        let mut clicked = false;
        for selector in &params.selectors {
            if self.page.click(selector).await? {
                clicked = true;
                break;
            }
        }
        if !clicked && !params.selectors.is_empty() {
            clicked = self.page.click_text(&params.selectors).await?;
        }

        if clicked {
            tokio::time::sleep(self.settle).await;
        } else {
            warn!(selectors = ?params.selectors, "Nothing to click");
        }
        Ok(())
    }

    /// Countdown-gated buttons: text match on the click targets, otherwise a
    /// visible enabled `waitForSelector` element
    async fn is_ready(&mut self, params: &WaitAndClick) -> Result<bool, PageError> {
        if let Some(text) = &params.wait_for_text {
            let needle = text.to_lowercase();
            for selector in &params.selectors {
                if let Some(el) = self.page.query(selector).await?.into_iter().next() {
                    if el.text.to_lowercase().contains(&needle) {
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }
        if let Some(selector) = &params.wait_for_selector {
            let first = self.page.query(selector).await?.into_iter().next();
            return Ok(first.map(|el| el.visible && !el.disabled).unwrap_or(false));
        }
        Ok(true)
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.page.query(selector).await?.is_empty() {
                debug!(selector = %selector, "Element present");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(selector = %selector, "Element never appeared");
                return Ok(());
            }
            tokio::time::sleep(ELEMENT_POLL.min(deadline - now)).await;
        }
    }

    async fn click_element(&mut self, selectors: &[String]) -> Result<(), PageError> {
        for selector in selectors.iter().map(String::as_str).chain(std::iter::once("video")) {
            if self.page.click(selector).await? {
                debug!(selector = %selector, "Clicked");
                break;
            }
        }
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn extract_video_url(
        &mut self,
        selectors: &[String],
        patterns: &[String],
        server: Option<&str>,
    ) -> Result<Flow, PageError> {
        let mut found = None;
        'selectors: for selector in selectors {
            for el in self.page.query(selector).await? {
                for source in [el.src, el.href].into_iter().flatten() {
                    if patterns.iter().any(|p| source.contains(p.as_str())) {
                        found = Some(source);
                        break 'selectors;
                    }
                }
            }
        }

        if found.is_none() {
            let html = self.page.page_html().await?;
            found = PLAYLIST_URL.find(&html).map(|m| m.as_str().replace("&amp;", "&"));
        }

        match found {
            Some(url) => {
                let server = server.unwrap_or(CAPTURE_LABEL).to_string();
                self.links.push(ExtractedLink {
                    quality: quality_of(&url),
                    title: server.clone(),
                    server,
                    url,
                });
                Ok(Flow::Stop)
            }
            None => Ok(Flow::Next),
        }
    }
}

fn is_absolute(href: &str) -> bool {
    href.starts_with("http")
}

fn has_primary_class(el: &ElementInfo) -> bool {
    el.class_name.contains("btn-success") || el.class_name.contains("btn-primary")
}
