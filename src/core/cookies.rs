//! Per-host cookie cache
//!
//! Written by script network calls (`Set-Cookie`) and by the rendered-page
//! bridge, read when a later request carries no `Cookie` header of its own.
//! Entries are last-write-wins per host.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookie string stored for `host`, if any
    pub fn get(&self, host: &str) -> Option<String> {
        let map = self.inner.read().ok()?;
        map.get(&host.to_ascii_lowercase()).cloned()
    }

    /// Replace the cookie string stored for `host`; blank values are ignored
    pub fn set(&self, host: &str, cookies: &str) {
        let cookies = cookies.trim();
        if host.is_empty() || cookies.is_empty() {
            return;
        }
        if let Ok(mut map) = self.inner.write() {
            map.insert(host.to_ascii_lowercase(), cookies.to_string());
        }
    }

    /// Merge `name=value` pairs into the host's string, newer values winning
    pub fn merge(&self, host: &str, pairs: &[(String, String)]) {
        if host.is_empty() || pairs.is_empty() {
            return;
        }
        let Ok(mut map) = self.inner.write() else {
            return;
        };
        let entry = map.entry(host.to_ascii_lowercase()).or_default();
        let mut merged = parse_cookie_string(entry);
        for (name, value) in pairs {
            match merged.iter_mut().find(|(existing, _)| existing == name) {
                Some(slot) => slot.1 = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }
        *entry = merged
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
    }

    pub fn for_url(&self, url: &str) -> Option<String> {
        host_of(url).and_then(|host| self.get(&host))
    }

    pub fn set_for_url(&self, url: &str, cookies: &str) {
        if let Some(host) = host_of(url) {
            self.set(&host, cookies);
        }
    }
}

/// Lower-cased host component of an absolute URL
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Split `a=1; b=2` into ordered pairs
pub fn parse_cookie_string(cookies: &str) -> Vec<(String, String)> {
    cookies
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// The `name=value` pair at the front of a `Set-Cookie` header
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_defaults_to_absent() {
        let jar = CookieJar::new();
        assert_eq!(jar.get("example.org"), None);
        assert_eq!(jar.for_url("https://example.org/a"), None);
    }

    #[test]
    fn test_last_write_wins() {
        let jar = CookieJar::new();
        jar.set("Example.org", "cf_clearance=1");
        jar.set("example.org", "cf_clearance=2");
        assert_eq!(jar.get("example.org").as_deref(), Some("cf_clearance=2"));

        jar.set("example.org", "   ");
        assert_eq!(jar.get("example.org").as_deref(), Some("cf_clearance=2"));
    }

    #[test]
    fn test_merge_replaces_by_name() {
        let jar = CookieJar::new();
        jar.set("example.org", "a=1; b=2");
        jar.merge("example.org", &[("b".into(), "3".into()), ("c".into(), "4".into())]);
        assert_eq!(jar.get("example.org").as_deref(), Some("a=1; b=3; c=4"));
    }

    #[test]
    fn test_clones_share_state() {
        let jar = CookieJar::new();
        let other = jar.clone();
        other.set_for_url("https://cdn.example.org/x", "s=1");
        assert_eq!(jar.get("cdn.example.org").as_deref(), Some("s=1"));
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("session=abc; Path=/; HttpOnly"),
            Some(("session".to_string(), "abc".to_string()))
        );
        assert_eq!(parse_set_cookie("=abc"), None);
        assert_eq!(parse_set_cookie("garbage"), None);
    }

    #[test]
    fn test_concurrent_writers() {
        let jar = CookieJar::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let jar = jar.clone();
                std::thread::spawn(move || jar.set("example.org", &format!("n={}", i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let value = jar.get("example.org").unwrap();
        assert!(value.starts_with("n="));
    }
}
