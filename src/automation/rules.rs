//! Declarative automation rules
//!
//! Rules arrive from extension code as loosely-typed JSON:
//!
//! ```json
//! { "steps": [ {"action": "extractUrl", "selectors": ["a.go"]}, ... ],
//!   "blockedPatterns": ["popads"] }
//! ```
//!
//! Parsing never fails on a malformed step. Missing parameters fall back to
//! their defaults and unrecognized actions become [`Step::Unknown`], which the
//! engine skips.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Parsed automation payload attached to an `automate` or `http` stream
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationRules {
    pub steps: Vec<Step>,
    /// Extension-declared request blocklist; `None` selects the built-in set
    pub blocked_patterns: Option<Vec<String>>,
    /// Regex extraction settings for `http` streams
    pub extraction: Option<HttpExtraction>,
    raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    ExtractUrl {
        selectors: Vec<String>,
        patterns: Vec<String>,
    },
    ExtractLinks {
        selectors: Vec<String>,
        exclude_patterns: Vec<String>,
        server_patterns: Vec<String>,
    },
    WaitAndClick(WaitAndClick),
    WaitForElement {
        selector: String,
        timeout: Duration,
    },
    ClickElement {
        selectors: Vec<String>,
    },
    ExtractVideoUrl {
        selectors: Vec<String>,
        patterns: Vec<String>,
        server: Option<String>,
    },
    Complete,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitAndClick {
    pub selectors: Vec<String>,
    pub wait: Duration,
    pub wait_for_selector: Option<String>,
    pub wait_for_text: Option<String>,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpExtraction {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub patterns: Vec<String>,
    pub video_headers: BTreeMap<String, String>,
}

impl AutomationRules {
    /// Parse a rules object. Returns `None` unless `steps` is an array, or
    /// the payload carries an `extraction` block instead.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let steps = object
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| steps.iter().map(Step::from_json).collect::<Vec<_>>());
        let extraction = object.get("extraction").and_then(HttpExtraction::from_json);

        if steps.is_none() && extraction.is_none() {
            return None;
        }

        Some(Self {
            steps: steps.unwrap_or_default(),
            blocked_patterns: object.get("blockedPatterns").and_then(Value::as_array).map(|p| string_items(p)),
            extraction,
            raw: value.clone(),
        })
    }

    /// Parse rules delivered as a JSON document string
    pub fn from_str_lenient(text: &str) -> Option<Self> {
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .and_then(|value| Self::from_json(&value))
    }

    /// True when the payload declared a step list, which `automate` streams require
    pub fn has_steps(&self) -> bool {
        self.raw.get("steps").map(Value::is_array).unwrap_or(false)
    }

    pub fn as_json(&self) -> &Value {
        &self.raw
    }
}

impl Serialize for AutomationRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AutomationRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let parsed = match &value {
            Value::String(text) => Self::from_str_lenient(text),
            other => Self::from_json(other),
        };
        parsed.ok_or_else(|| serde::de::Error::custom("automation rules need a steps array or an extraction block"))
    }
}

impl Step {
    pub fn from_json(value: &Value) -> Step {
        let Some(params) = value.as_object() else {
            return Step::Unknown(String::new());
        };
        let action = params.get("action").and_then(Value::as_str).unwrap_or_default();

        match action {
            "extractUrl" => Step::ExtractUrl {
                selectors: list(params.get("selectors")),
                patterns: list(params.get("patterns")),
            },
            "extractLinks" => Step::ExtractLinks {
                selectors: list(params.get("selectors")),
                exclude_patterns: list(params.get("excludePatterns")),
                server_patterns: list(params.get("serverPatterns")),
            },
            "waitAndClick" => Step::WaitAndClick(WaitAndClick {
                selectors: list(params.get("selectors")),
                wait: millis(params.get("waitMs"), 1_000),
                wait_for_selector: non_empty(params.get("waitForSelector")),
                wait_for_text: non_empty(params.get("waitForText")),
                max_retries: number(params.get("maxRetries")).map(|n| n as u32).unwrap_or(15),
                retry_interval: millis(params.get("retryInterval"), 1_000),
            }),
            "wait" | "waitForElement" => Step::WaitForElement {
                selector: non_empty(params.get("selector")).unwrap_or_else(|| "video".to_string()),
                timeout: millis(params.get("timeout"), 10_000),
            },
            "click" | "clickElement" => {
                let mut selectors = list(params.get("selectors"));
                if let Some(single) = non_empty(params.get("selector")) {
                    selectors.push(single);
                }
                Step::ClickElement { selectors }
            }
            "extractVideoUrl" => Step::ExtractVideoUrl {
                selectors: list(params.get("selectors")),
                patterns: list(params.get("patterns")),
                server: non_empty(params.get("server")),
            },
            "complete" => Step::Complete,
            other => Step::Unknown(other.to_string()),
        }
    }

    /// Action name for diagnostics
    pub fn action(&self) -> &str {
        match self {
            Step::ExtractUrl { .. } => "extractUrl",
            Step::ExtractLinks { .. } => "extractLinks",
            Step::WaitAndClick(_) => "waitAndClick",
            Step::WaitForElement { .. } => "waitForElement",
            Step::ClickElement { .. } => "clickElement",
            Step::ExtractVideoUrl { .. } => "extractVideoUrl",
            Step::Complete => "complete",
            Step::Unknown(name) => name,
        }
    }
}

impl HttpExtraction {
    fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            method: non_empty(object.get("method"))
                .map(|m| m.to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            headers: string_map(object.get("headers")),
            patterns: list(object.get("patterns")),
            video_headers: string_map(object.get("videoHeaders")),
        })
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_items(items: &[Value]) -> Vec<String> {
    items.iter().filter_map(scalar).collect()
}

/// An array of strings, or a lone string treated as a one-element list
fn list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => string_items(items),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value.and_then(scalar).filter(|s| !s.is_empty())
}

fn number(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn millis(value: Option<&Value>, default: u64) -> Duration {
    Duration::from_millis(number(value).unwrap_or(default))
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| scalar(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_rules() {
        let rules = AutomationRules::from_json(&json!({
            "steps": [
                {"action": "extractUrl", "selectors": ["a.go"], "patterns": ["hubcloud"]},
                {"action": "waitAndClick", "selectors": ["#btn"], "waitForText": "get links", "maxRetries": 3, "retryInterval": 100},
                {"action": "extractLinks", "selectors": ["a.btn"], "excludePatterns": ["ads.com"]},
                {"action": "complete"}
            ],
            "blockedPatterns": ["popads"]
        }))
        .unwrap();

        assert_eq!(rules.steps.len(), 4);
        assert_eq!(rules.blocked_patterns, Some(vec!["popads".to_string()]));
        assert!(rules.has_steps());

        match &rules.steps[1] {
            Step::WaitAndClick(step) => {
                assert_eq!(step.max_retries, 3);
                assert_eq!(step.retry_interval, Duration::from_millis(100));
                assert_eq!(step.wait, Duration::from_millis(1_000));
                assert_eq!(step.wait_for_text.as_deref(), Some("get links"));
                assert_eq!(step.wait_for_selector, None);
            }
            other => panic!("unexpected step {:?}", other),
        }
        assert_eq!(rules.steps[3], Step::Complete);
    }

    #[test]
    fn test_aliases_and_defaults() {
        assert_eq!(
            Step::from_json(&json!({"action": "wait"})),
            Step::WaitForElement {
                selector: "video".to_string(),
                timeout: Duration::from_millis(10_000)
            }
        );
        assert_eq!(
            Step::from_json(&json!({"action": "click", "selector": "#play"})),
            Step::ClickElement {
                selectors: vec!["#play".to_string()]
            }
        );
        match Step::from_json(&json!({"action": "waitAndClick"})) {
            Step::WaitAndClick(step) => {
                assert!(step.selectors.is_empty());
                assert_eq!(step.max_retries, 15);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_malformed_steps_do_not_fail() {
        let rules = AutomationRules::from_json(&json!({
            "steps": [null, 42, {"action": "teleport"}, {"action": "extractLinks", "selectors": "a.dl"}]
        }))
        .unwrap();

        assert_eq!(rules.steps[0], Step::Unknown(String::new()));
        assert_eq!(rules.steps[1], Step::Unknown(String::new()));
        assert_eq!(rules.steps[2], Step::Unknown("teleport".to_string()));
        assert_eq!(
            rules.steps[3],
            Step::ExtractLinks {
                selectors: vec!["a.dl".to_string()],
                exclude_patterns: vec![],
                server_patterns: vec![],
            }
        );
    }

    #[test]
    fn test_missing_steps_is_rejected() {
        assert!(AutomationRules::from_json(&json!({"blockedPatterns": []})).is_none());
        assert!(AutomationRules::from_json(&json!({"steps": "nope"})).is_none());
        assert!(AutomationRules::from_json(&json!([])).is_none());
        assert!(AutomationRules::from_str_lenient("not json").is_none());
    }

    #[test]
    fn test_extraction_only_payload() {
        let rules = AutomationRules::from_str_lenient(
            r#"{"extraction": {"method": "post", "patterns": ["file:\"([^\"]+)\""], "videoHeaders": {"Referer": "https://a.b/"}}}"#,
        )
        .unwrap();

        assert!(!rules.has_steps());
        let extraction = rules.extraction.unwrap();
        assert_eq!(extraction.method, "POST");
        assert_eq!(extraction.patterns.len(), 1);
        assert_eq!(extraction.video_headers.get("Referer").map(String::as_str), Some("https://a.b/"));
    }

    #[test]
    fn test_serializes_as_received() {
        let raw = json!({"steps": [{"action": "complete"}], "extra": 1});
        let rules = AutomationRules::from_json(&raw).unwrap();
        assert_eq!(serde_json::to_value(&rules).unwrap(), raw);

        let back: AutomationRules = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(back, rules);
    }
}
