//! Outbound HTTP for extension scripts
//!
//! [`NetworkClient`] is the transport seam (reqwest in production, stubs in
//! tests). [`HostNetwork`] layers the host rules on top: per-host cookie
//! injection, `Set-Cookie` capture and the form content type for bodies.

use crate::core::config::RuntimeConfig;
use crate::core::cookies::{host_of, parse_set_cookie, CookieJar};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("failed to read body from {url}: {message}")]
    Body { url: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

/// What scripts receive from `network.get/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub data: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub url: String,
    /// Raw `Set-Cookie` values, not exposed to scripts
    #[serde(skip)]
    pub set_cookies: Vec<String>,
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// reqwest-backed transport
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| NetworkError::InvalidRequest(format!("failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(|e| NetworkError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let mut headers = BTreeMap::new();
        let mut set_cookies = Vec::new();
        for (name, value) in resp.headers() {
            let Ok(value) = value.to_str() else { continue };
            if name == reqwest::header::SET_COOKIE {
                set_cookies.push(value.to_string());
            } else {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let data = resp.text().await.map_err(|e| NetworkError::Body {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        debug!(url = %request.url, status, body_len = data.len(), "Request completed");
        Ok(HttpResponse {
            data,
            status,
            headers,
            url: final_url,
            set_cookies,
        })
    }
}

/// Script-facing network capability
#[derive(Clone)]
pub struct HostNetwork {
    client: Arc<dyn NetworkClient>,
    cookies: CookieJar,
}

impl HostNetwork {
    pub fn new(client: Arc<dyn NetworkClient>, cookies: CookieJar) -> Self {
        Self { client, cookies }
    }

    pub async fn get(&self, url: &str, headers: Vec<(String, String)>) -> Result<HttpResponse, NetworkError> {
        self.send(HttpRequest::get(url).with_headers(headers)).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: String,
        headers: Vec<(String, String)>,
    ) -> Result<HttpResponse, NetworkError> {
        self.send(HttpRequest::post(url, body).with_headers(headers)).await
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
        let request = self.prepare(request)?;
        let host = host_of(&request.url);
        let response = self.client.send(request).await?;

        if let Some(host) = host {
            let pairs: Vec<(String, String)> = response
                .set_cookies
                .iter()
                .filter_map(|header| parse_set_cookie(header))
                .collect();
            self.cookies.merge(&host, &pairs);
        }

        Ok(response)
    }

    /// Apply the host rules to an outgoing request
    pub fn prepare(&self, mut request: HttpRequest) -> Result<HttpRequest, NetworkError> {
        let host = host_of(&request.url)
            .ok_or_else(|| NetworkError::InvalidRequest(format!("not an absolute url: {}", request.url)))?;

        if !request.has_header("cookie") {
            if let Some(cookies) = self.cookies.get(&host) {
                debug!(host = %host, "Injecting cached cookies");
                request.headers.push(("Cookie".to_string(), cookies));
            }
        }

        if request.method == HttpMethod::Post && !request.has_header("content-type") {
            request
                .headers
                .push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }

        if request.url.starts_with("http://") {
            warn!(url = %request.url, "Script requested a plain-http url");
        }

        Ok(request)
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every request and answers from a fixed url → body table
    #[derive(Default)]
    pub struct StubClient {
        pub routes: BTreeMap<String, HttpResponse>,
        pub seen: Mutex<Vec<HttpRequest>>,
    }

    impl StubClient {
        pub fn with_route(mut self, url: &str, body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                HttpResponse {
                    data: body.to_string(),
                    status: 200,
                    url: url.to_string(),
                    ..Default::default()
                },
            );
            self
        }

        pub fn with_response(mut self, url: &str, response: HttpResponse) -> Self {
            self.routes.insert(url.to_string(), response);
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NetworkClient for StubClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkError> {
            self.seen.lock().unwrap().push(request.clone());
            self.routes
                .get(&request.url)
                .cloned()
                .ok_or_else(|| NetworkError::Transport {
                    url: request.url.clone(),
                    message: "connection refused".to_string(),
                })
        }
    }
}
