//! Core host services
//!
//! This module provides the ambient layer shared by every component:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system
//! - Durable key-value storage
//! - Per-host cookie cache
//! - Service wiring

pub mod config;
pub mod cookies;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod services;
pub mod storage;

pub use config::Config;
pub use cookies::CookieJar;
pub use error::{ErrorContext, Result, StreamboxError};
pub use logging::Logger;
pub use storage::KeyValueStore;
