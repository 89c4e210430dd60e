//! StreamBox Library
//!
//! Hosts streaming extensions: a sandboxed script runtime with the host API
//! installed, a lenient marshaller for what scripts return, and an
//! automation engine that walks rendered pages to find playable links.

pub mod automation;
pub mod cli;
pub mod core;
pub mod extension;

// Re-export commonly used types
pub use crate::automation::{AutomationEngine, AutomationRules, StreamResolver};
pub use crate::core::{Config, StreamboxError};
pub use crate::extension::{ExtensionExecutor, ScriptRuntime};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
