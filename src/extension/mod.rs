//! Extension host
//!
//! Runs extension modules in a sandboxed script runtime with the host API
//! installed, and turns what they return into typed results.

pub mod browser;
pub mod executor;
pub mod html;
pub mod js_bindings;
pub mod js_runtime;
pub mod marshal;
pub mod models;
pub mod module_source;
pub mod network;
pub mod value;

pub use executor::ExtensionExecutor;
pub use js_bindings::HostServices;
pub use js_runtime::{ScriptError, ScriptRuntime};
pub use module_source::{DirectoryModuleSource, ModuleKind, ModuleSource};
