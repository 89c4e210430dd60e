//! Rendered-page primitive the automation engine drives
//!
//! A [`Renderer`] opens one isolated [`PageSession`] per extraction run. The
//! session routes every request the page makes through the supplied
//! [`RequestInterceptor`] and must suppress popup windows.

use super::filter::RequestInterceptor;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("failed to launch renderer: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("renderer error: {0}")]
    Renderer(String),
}

/// Snapshot of one element as the page sees it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    /// Resolved absolute `href`, when the element has one
    pub href: Option<String>,
    pub src: Option<String>,
    pub text: String,
    pub class_name: String,
    pub value: Option<String>,
    pub disabled: bool,
    pub visible: bool,
}

/// Elements tried when a click selector matches nothing usable
pub const FALLBACK_BUTTONS: &str = r#"button, a.btn, a.btn2, input[type="submit"], input[type="button"]"#;

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self, interceptor: RequestInterceptor) -> Result<Box<dyn PageSession>, PageError>;
}

#[async_trait]
pub trait PageSession: Send {
    /// Load `url` and wait for the document to finish loading
    async fn navigate(&mut self, url: &str) -> Result<(), PageError>;

    /// Every element matching `selector`; an invalid selector matches nothing
    async fn query(&mut self, selector: &str) -> Result<Vec<ElementInfo>, PageError>;

    async fn page_html(&mut self) -> Result<String, PageError>;

    /// Click the first element matching `selector` unless it is disabled
    async fn click(&mut self, selector: &str) -> Result<bool, PageError>;

    /// Click the first [`FALLBACK_BUTTONS`] element whose text or value
    /// contains one of `needles`, ignoring case
    async fn click_text(&mut self, needles: &[String]) -> Result<bool, PageError>;

    async fn close(&mut self) -> Result<(), PageError>;
}
