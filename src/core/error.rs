//! Error type system for StreamBox
//!
//! This module provides the crate-wide error type with:
//! - Classification by subsystem (script, network, storage)
//! - A context extension trait for wrapping foreign errors

use crate::extension::js_runtime::ScriptError;

/// Main error type for the StreamBox host
#[derive(Debug, thiserror::Error)]
pub enum StreamboxError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("Storage pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    // Extension-related errors
    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error(transparent)]
    Script(#[from] ScriptError),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl StreamboxError {
    /// Get the error type name for structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            StreamboxError::InitializationError(_) => "InitializationError",
            StreamboxError::StorageError(_) => "StorageError",
            StreamboxError::PoolError(_) => "PoolError",
            StreamboxError::ExtensionNotFound(_) => "ExtensionNotFound",
            StreamboxError::ModuleNotFound(_) => "ModuleNotFound",
            StreamboxError::Script(_) => "ScriptError",
            StreamboxError::IoError(_) => "IoError",
            StreamboxError::NetworkError(_) => "NetworkError",
            StreamboxError::SerializationError(_) => "SerializationError",
            StreamboxError::ValidationError(_) => "ValidationError",
        }
    }
}

/// Result type alias for operations that can fail with StreamboxError
pub type Result<T> = std::result::Result<T, StreamboxError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            StreamboxError::InitializationError(format!("{}: {}", context_str, e))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let context_str = f();
            StreamboxError::InitializationError(format!("{}: {}", context_str, e))
        })
    }
}
