//! Domain model delivered by extension operations
//!
//! All of these are request-scoped value objects: built per call, handed to
//! the caller, and never tracked afterwards.

use crate::automation::rules::AutomationRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One entry of a module's `catalog` or `genres` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    #[serde(rename = "filter")]
    pub filter_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub title: String,
    pub link: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Movie,
    Series,
}

impl ContentType {
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "series" | "tv" | "show" => ContentType::Series,
            _ => ContentType::Movie,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfo {
    pub title: String,
    pub image: String,
    pub synopsis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cast: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    pub link_list: Vec<ContentLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLink {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_links: Option<Vec<DirectLink>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectLink {
    pub title: String,
    pub link: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub title: String,
    pub link: String,
}

/// How a stream link is turned into something playable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    M3u8,
    Mp4,
    Mkv,
    Direct,
    /// Walk the attached automation rules in a rendered session
    Automate,
    /// Fetch the link and pull the media URL out with regex patterns
    Http,
    Webview,
    Browser,
    Navigate,
}

impl StreamType {
    /// Missing types default to `m3u8`; unrecognized ones play as `direct`
    pub fn parse_lenient(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return StreamType::M3u8;
        };
        match value.to_ascii_lowercase().as_str() {
            "m3u8" | "hls" => StreamType::M3u8,
            "mp4" => StreamType::Mp4,
            "mkv" => StreamType::Mkv,
            "direct" => StreamType::Direct,
            "automate" => StreamType::Automate,
            "http" => StreamType::Http,
            "webview" => StreamType::Webview,
            "browser" => StreamType::Browser,
            "navigate" => StreamType::Navigate,
            _ => StreamType::Direct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::M3u8 => "m3u8",
            StreamType::Mp4 => "mp4",
            StreamType::Mkv => "mkv",
            StreamType::Direct => "direct",
            StreamType::Automate => "automate",
            StreamType::Http => "http",
            StreamType::Webview => "webview",
            StreamType::Browser => "browser",
            StreamType::Navigate => "navigate",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    pub title: String,
    pub language: String,
    #[serde(rename = "type")]
    pub subtitle_type: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSource {
    pub server: String,
    pub link: String,
    #[serde(rename = "type")]
    pub stream_type: StreamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<Vec<Subtitle>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_rules: Option<AutomationRules>,
}

/// Candidate link produced by the extraction engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub title: String,
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_type_parsing() {
        assert_eq!(StreamType::parse_lenient(None), StreamType::M3u8);
        assert_eq!(StreamType::parse_lenient(Some("  ")), StreamType::M3u8);
        assert_eq!(StreamType::parse_lenient(Some("Automate")), StreamType::Automate);
        assert_eq!(StreamType::parse_lenient(Some("mystery")), StreamType::Direct);
        assert_eq!(StreamType::Http.to_string(), "http");
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!(ContentType::parse_lenient("Series"), ContentType::Series);
        assert_eq!(ContentType::parse_lenient(""), ContentType::Movie);
        assert_eq!(ContentType::parse_lenient("anime"), ContentType::Movie);
    }

    #[test]
    fn test_wire_names() {
        let entry = CatalogEntry {
            title: "Trending".into(),
            filter_key: "/trending".into(),
        };
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!({"title": "Trending", "filter": "/trending"}));

        let source = StreamSource {
            server: "S1".into(),
            link: "https://a/b.m3u8".into(),
            stream_type: StreamType::M3u8,
            quality: None,
            subtitles: None,
            headers: None,
            automation_rules: None,
        };
        assert_eq!(
            serde_json::to_value(&source).unwrap(),
            json!({"server": "S1", "link": "https://a/b.m3u8", "type": "m3u8"})
        );
    }
}
