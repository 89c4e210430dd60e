//! Extraction automation
//!
//! Drives a rendered page through an extension's declarative steps to find
//! playable links, and resolves `automate`/`http` stream sources into
//! playable ones.

pub mod chromium;
pub mod engine;
pub mod filter;
pub mod http_extract;
pub mod page;
pub mod resolver;
pub mod rules;

pub use engine::{AutomationEngine, ExtractionHandle};
pub use resolver::StreamResolver;
pub use rules::{AutomationRules, Step};
