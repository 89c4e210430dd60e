//! Lenient conversion from script values into the domain model
//!
//! Extension code is loosely typed. A field with the wrong shape falls back
//! to its default instead of failing the object, and list items that are not
//! mappings are dropped instead of failing the list.

use super::models::{
    CatalogEntry, ContentInfo, ContentLink, ContentType, DirectLink, Episode, Post, StreamSource, StreamType,
    Subtitle,
};
use super::value::DynamicValue;
use crate::automation::rules::AutomationRules;
use std::collections::BTreeMap;
use tracing::debug;

/// Types that can be read out of a script mapping
pub trait FromDynamic: Sized {
    /// `None` when `value` is not a mapping, or the mapping cannot satisfy a
    /// hard invariant of the type
    fn from_dynamic(value: &DynamicValue) -> Option<Self>;
}

/// Every item of a sequence that resolves to `T`; empty for any non-sequence
pub fn parse_list<T: FromDynamic>(value: &DynamicValue) -> Vec<T> {
    match value {
        DynamicValue::Sequence(items) => {
            let parsed: Vec<T> = items.iter().filter_map(T::from_dynamic).collect();
            if parsed.len() != items.len() {
                debug!(
                    dropped = items.len() - parsed.len(),
                    kept = parsed.len(),
                    "Dropped list items that did not resolve"
                );
            }
            parsed
        }
        _ => Vec::new(),
    }
}

pub fn parse_object<T: FromDynamic>(value: &DynamicValue) -> Option<T> {
    T::from_dynamic(value)
}

/// Read-only accessor over one mapping with coercing getters
struct Fields<'a>(&'a BTreeMap<String, DynamicValue>);

impl<'a> Fields<'a> {
    fn of(value: &'a DynamicValue) -> Option<Self> {
        value.as_mapping().map(Fields)
    }

    fn raw(&self, key: &str) -> Option<&'a DynamicValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    fn string(&self, key: &str) -> String {
        self.opt_string(key).unwrap_or_default()
    }

    fn opt_string(&self, key: &str) -> Option<String> {
        self.raw(key).and_then(DynamicValue::coerce_string)
    }

    /// First present key wins
    fn string_any(&self, keys: &[&str]) -> String {
        keys.iter().find_map(|key| self.opt_string(key)).unwrap_or_default()
    }

    fn string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.raw(key)? {
            DynamicValue::Sequence(items) => Some(items.iter().filter_map(DynamicValue::coerce_string).collect()),
            other => other.coerce_string().map(|s| vec![s]),
        }
    }

    fn string_map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let map = self.raw(key)?.as_mapping()?;
        Some(
            map.iter()
                .filter_map(|(k, v)| v.coerce_string().map(|v| (k.clone(), v)))
                .collect(),
        )
    }

    fn list<T: FromDynamic>(&self, key: &str) -> Option<Vec<T>> {
        self.raw(key).map(parse_list)
    }
}

impl FromDynamic for CatalogEntry {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(CatalogEntry {
            title: fields.string("title"),
            filter_key: fields.string("filter"),
        })
    }
}

impl FromDynamic for Post {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(Post {
            title: fields.string("title"),
            link: fields.string("link"),
            image: fields.string("image"),
            provider: fields.opt_string("provider"),
        })
    }
}

impl FromDynamic for ContentInfo {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(ContentInfo {
            title: fields.string("title"),
            image: fields.string("image"),
            synopsis: fields.string("synopsis"),
            imdb_id: fields.opt_string("imdbId"),
            content_type: fields
                .opt_string("type")
                .map(|t| ContentType::parse_lenient(&t))
                .unwrap_or_default(),
            tags: fields.string_list("tags"),
            cast: fields.string_list("cast"),
            rating: fields.opt_string("rating"),
            year: fields.opt_string("year"),
            link_list: fields.list("linkList").unwrap_or_default(),
            logo: fields.opt_string("logo"),
            background: fields.opt_string("background"),
            poster: fields.opt_string("poster"),
        })
    }
}

impl FromDynamic for ContentLink {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(ContentLink {
            title: fields.string("title"),
            quality: fields.opt_string("quality"),
            episodes_link: fields.opt_string("episodesLink"),
            direct_links: fields.list("directLinks"),
        })
    }
}

impl FromDynamic for DirectLink {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(DirectLink {
            title: fields.string("title"),
            link: fields.string("link"),
            link_type: fields.opt_string("type"),
        })
    }
}

impl FromDynamic for Episode {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(Episode {
            title: fields.string("title"),
            link: fields.string("link"),
        })
    }
}

impl FromDynamic for Subtitle {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        Some(Subtitle {
            title: fields.string("title"),
            language: fields.string_any(&["language", "lang"]),
            subtitle_type: fields.string("type"),
            uri: fields.string_any(&["uri", "url", "link"]),
        })
    }
}

impl FromDynamic for StreamSource {
    fn from_dynamic(value: &DynamicValue) -> Option<Self> {
        let fields = Fields::of(value)?;
        let stream_type = StreamType::parse_lenient(fields.opt_string("type").as_deref());
        let automation_rules = fields
            .raw("automationRules")
            .or_else(|| fields.raw("automation"))
            .and_then(parse_rules);

        let link = fields.string("link");
        if stream_type == StreamType::Automate && !automation_rules.as_ref().map(AutomationRules::has_steps).unwrap_or(false) {
            debug!(link = %link, "Dropping automate stream without a step list");
            return None;
        }

        Some(StreamSource {
            server: fields.string("server"),
            link,
            stream_type,
            quality: fields.opt_string("quality"),
            subtitles: fields.list("subtitles"),
            headers: fields.string_map("headers"),
            automation_rules,
        })
    }
}

/// Rules may arrive as an object or as a JSON document string
fn parse_rules(value: &DynamicValue) -> Option<AutomationRules> {
    match value {
        DynamicValue::String(text) => AutomationRules::from_str_lenient(text),
        DynamicValue::Mapping(_) => AutomationRules::from_json(&value.to_json()),
        _ => None,
    }
}
