//! Turns stream sources into playable ones
//!
//! `automate` sources run the automation engine, `http` sources run the
//! regex extractor, everything else is already playable and passes through.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::engine::AutomationEngine;
use super::http_extract::HttpExtractor;
use crate::extension::models::{StreamSource, StreamType};

#[derive(Clone)]
pub struct StreamResolver {
    engine: AutomationEngine,
    extractor: HttpExtractor,
}

impl StreamResolver {
    pub fn new(engine: AutomationEngine, extractor: HttpExtractor) -> Self {
        Self { engine, extractor }
    }

    pub async fn resolve(&self, source: &StreamSource) -> Vec<StreamSource> {
        self.resolve_with(source, CancellationToken::new()).await
    }

    /// Like [`resolve`](Self::resolve), abandoning an `automate` run once
    /// `cancel` fires
    pub async fn resolve_with(&self, source: &StreamSource, cancel: CancellationToken) -> Vec<StreamSource> {
        match source.stream_type {
            StreamType::Automate => self.resolve_automate(source, cancel).await,
            StreamType::Http => self.resolve_http(source).await,
            _ => vec![source.clone()],
        }
    }

    async fn resolve_automate(&self, source: &StreamSource, cancel: CancellationToken) -> Vec<StreamSource> {
        let Some(rules) = source.automation_rules.as_ref().filter(|r| r.has_steps()) else {
            warn!(server = %source.server, "Automate stream without steps");
            return Vec::new();
        };

        self.engine
            .extract(&source.link, rules, cancel)
            .await
            .into_iter()
            .map(|link| StreamSource {
                server: if link.server.is_empty() { link.title } else { link.server },
                link: link.url,
                stream_type: StreamType::Direct,
                quality: link.quality,
                subtitles: None,
                headers: None,
                automation_rules: None,
            })
            .collect()
    }

    async fn resolve_http(&self, source: &StreamSource) -> Vec<StreamSource> {
        let Some(extraction) = source.automation_rules.as_ref().and_then(|r| r.extraction.as_ref()) else {
            warn!(server = %source.server, "Http stream without extraction rules");
            return Vec::new();
        };

        match self.extractor.extract(&source.link, extraction).await {
            Ok(Some(media)) => {
                let stream_type = if media.is_playlist() {
                    StreamType::M3u8
                } else {
                    StreamType::Direct
                };
                vec![StreamSource {
                    server: source.server.clone(),
                    link: media.url,
                    stream_type,
                    quality: source.quality.clone(),
                    subtitles: source.subtitles.clone(),
                    headers: Some(media.headers).filter(|h| !h.is_empty()),
                    automation_rules: None,
                }]
            }
            Ok(None) => {
                debug!(server = %source.server, "Http extraction found nothing");
                Vec::new()
            }
            Err(e) => {
                warn!(server = %source.server, error_type = e.error_type(), "Http extraction failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::page::fixture::{FixturePage, FixtureRenderer};
    use crate::automation::rules::AutomationRules;
    use crate::core::config::AutomationConfig;
    use crate::core::cookies::CookieJar;
    use crate::extension::network::testing::StubClient;
    use crate::extension::network::HostNetwork;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver(renderer: FixtureRenderer, stub: StubClient) -> StreamResolver {
        let config = AutomationConfig {
            overall_timeout_ms: 2_000,
            settle_delay_ms: 5,
            ..AutomationConfig::default()
        };
        StreamResolver::new(
            AutomationEngine::new(Arc::new(renderer), config),
            HttpExtractor::new(HostNetwork::new(Arc::new(stub), CookieJar::new())),
        )
    }

    fn source(stream_type: StreamType, link: &str, rules: Option<serde_json::Value>) -> StreamSource {
        StreamSource {
            server: "Origin".to_string(),
            link: link.to_string(),
            stream_type,
            quality: Some("720p".to_string()),
            subtitles: None,
            headers: None,
            automation_rules: rules.and_then(|r| AutomationRules::from_json(&r)),
        }
    }

    #[tokio::test]
    async fn test_automate_becomes_direct_sources() {
        let renderer = FixtureRenderer::new(vec![(
            "https://dl.example/",
            FixturePage::html(
                r#"<a class="dl" href="https://files.example/a.mkv">[Alpha] 1080p</a>
                   <a class="dl" href="https://files.example/b.mkv">Plain</a>"#,
            ),
        )]);
        let resolver = resolver(renderer, StubClient::default());
        let rules = json!({"steps": [{"action": "extractLinks", "selectors": ["a.dl"]}]});

        let resolved = resolver
            .resolve(&source(StreamType::Automate, "https://dl.example/", Some(rules)))
            .await;

        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|s| s.stream_type == StreamType::Direct));
        assert_eq!(resolved[0].server, "Alpha");
        assert_eq!(resolved[0].quality.as_deref(), Some("1080p"));
        assert_eq!(resolved[1].server, "Download");
    }

    #[tokio::test]
    async fn test_http_yields_playlist_with_headers() {
        let stub = StubClient::default().with_route("https://embed.example/v", r#"file: "https://cdn.example/x.m3u8""#);
        let resolver = resolver(FixtureRenderer::default(), stub);
        let rules = json!({"extraction": {
            "patterns": [r#"file: "([^"]+)""#],
            "videoHeaders": {"Referer": "https://embed.example/"}
        }});

        let resolved = resolver
            .resolve(&source(StreamType::Http, "https://embed.example/v", Some(rules)))
            .await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].stream_type, StreamType::M3u8);
        assert_eq!(resolved[0].link, "https://cdn.example/x.m3u8");
        assert_eq!(
            resolved[0].headers.as_ref().and_then(|h| h.get("Referer")).map(String::as_str),
            Some("https://embed.example/")
        );
    }

    #[tokio::test]
    async fn test_other_types_pass_through() {
        let resolver = resolver(FixtureRenderer::default(), StubClient::default());
        let original = source(StreamType::Mp4, "https://cdn.example/a.mp4", None);
        assert_eq!(resolver.resolve(&original).await, vec![original.clone()]);

        let broken = source(StreamType::Http, "https://embed.example/v", None);
        assert!(resolver.resolve(&broken).await.is_empty());
    }
}
