//! Regex extraction for `http` streams
//!
//! The stream link is fetched through the host network (so cached cookies
//! apply) and the first pattern whose regex matches yields its first
//! capture group as the media URL.

use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::rules::HttpExtraction;
use crate::core::error::{Result, StreamboxError};
use crate::extension::network::HostNetwork;

/// A media URL pulled out of a fetched page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMedia {
    pub url: String,
    /// Headers the player must send with the media requests
    pub headers: BTreeMap<String, String>,
}

impl ExtractedMedia {
    pub fn is_playlist(&self) -> bool {
        self.url.contains(".m3u8")
    }
}

#[derive(Clone)]
pub struct HttpExtractor {
    network: HostNetwork,
}

impl HttpExtractor {
    pub fn new(network: HostNetwork) -> Self {
        Self { network }
    }

    /// `Ok(None)` when the page loaded but no pattern matched
    pub async fn extract(&self, link: &str, extraction: &HttpExtraction) -> Result<Option<ExtractedMedia>> {
        let headers: Vec<(String, String)> = extraction
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        debug!(url = %link, method = %extraction.method, "Fetching page for extraction");
        let response = if extraction.method == "GET" {
            self.network.get(link, headers).await
        } else {
            self.network.post(link, String::new(), headers).await
        }
        .map_err(|e| StreamboxError::NetworkError(e.to_string()))?;

        let html = response.data;
        debug!(url = %link, bytes = html.len(), patterns = extraction.patterns.len(), "Matching extraction patterns");

        let Some(url) = first_capture(&html, &extraction.patterns) else {
            info!(url = %link, "No extraction pattern matched");
            return Ok(None);
        };

        info!(url = %link, media = %url, "Extracted media url");
        Ok(Some(ExtractedMedia {
            url,
            headers: extraction.video_headers.clone(),
        }))
    }
}

fn first_capture(text: &str, patterns: &[String]) -> Option<String> {
    for pattern in patterns {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                warn!(pattern = %pattern, "Skipping invalid extraction pattern: {}", e);
                continue;
            }
        };
        if let Some(group) = regex.captures(text).and_then(|c| c.get(1)) {
            return Some(group.as_str().to_string());
        }
    }
    None
}
