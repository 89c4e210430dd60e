//! Where extension module sources come from
//!
//! Installed extensions are laid out as `<root>/<extension>/<module>.js`,
//! with one file per module (`catalog`, `posts`, `meta`, `stream`,
//! `episodes`). Installation itself happens elsewhere.

use crate::core::error::{Result, StreamboxError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Module names an extension may ship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Catalog,
    Posts,
    Meta,
    Stream,
    Episodes,
}

impl ModuleKind {
    pub fn file_stem(&self) -> &'static str {
        match self {
            ModuleKind::Catalog => "catalog",
            ModuleKind::Posts => "posts",
            ModuleKind::Meta => "meta",
            ModuleKind::Stream => "stream",
            ModuleKind::Episodes => "episodes",
        }
    }
}

#[async_trait]
pub trait ModuleSource: Send + Sync {
    async fn load(&self, extension: &str, module: ModuleKind) -> Result<String>;
}

pub struct DirectoryModuleSource {
    root: PathBuf,
}

impl DirectoryModuleSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn module_path(&self, extension: &str, module: ModuleKind) -> Result<PathBuf> {
        let valid = !extension.is_empty()
            && extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !extension.starts_with('.');
        if !valid {
            return Err(StreamboxError::ValidationError(format!("Invalid extension id: {}", extension)));
        }
        Ok(self.root.join(extension).join(format!("{}.js", module.file_stem())))
    }

    /// Extension ids present under the root
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ModuleSource for DirectoryModuleSource {
    async fn load(&self, extension: &str, module: ModuleKind) -> Result<String> {
        let path = self.module_path(extension, module)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if !tokio::fs::try_exists(self.root.join(extension)).await.unwrap_or(false) {
                return Err(StreamboxError::ExtensionNotFound(extension.to_string()));
            }
            return Err(StreamboxError::ModuleNotFound(format!("{}/{}", extension, module.file_stem())));
        }
        debug!(path = %path.display(), "Loading module source");
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

/// Module sources held in memory, keyed by extension and module
#[derive(Default, Clone)]
pub struct InMemoryModuleSource {
    modules: Arc<RwLock<HashMap<(String, ModuleKind), String>>>,
}

impl InMemoryModuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, extension: &str, module: ModuleKind, source: impl Into<String>) {
        if let Ok(mut modules) = self.modules.write() {
            modules.insert((extension.to_string(), module), source.into());
        }
    }
}

#[async_trait]
impl ModuleSource for InMemoryModuleSource {
    async fn load(&self, extension: &str, module: ModuleKind) -> Result<String> {
        let modules = self
            .modules
            .read()
            .map_err(|_| StreamboxError::InitializationError("module table lock poisoned".to_string()))?;
        modules
            .get(&(extension.to_string(), module))
            .cloned()
            .ok_or_else(|| StreamboxError::ModuleNotFound(format!("{}/{}", extension, module.file_stem())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("demo")).unwrap();
        std::fs::write(dir.path().join("demo/catalog.js"), "const catalog = [];").unwrap();

        let source = DirectoryModuleSource::new(dir.path());
        assert_eq!(source.load("demo", ModuleKind::Catalog).await.unwrap(), "const catalog = [];");

        assert!(matches!(
            source.load("demo", ModuleKind::Stream).await,
            Err(StreamboxError::ModuleNotFound(_))
        ));
        assert!(matches!(
            source.load("other", ModuleKind::Catalog).await,
            Err(StreamboxError::ExtensionNotFound(_))
        ));
        assert_eq!(source.list().await.unwrap(), vec!["demo".to_string()]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryModuleSource::new(dir.path());
        assert!(matches!(
            source.load("../etc", ModuleKind::Meta).await,
            Err(StreamboxError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let source = DirectoryModuleSource::new("/definitely/not/here");
        assert!(source.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory() {
        let source = InMemoryModuleSource::new();
        source.insert("demo", ModuleKind::Posts, "function getPosts() { return []; }");
        assert!(source.load("demo", ModuleKind::Posts).await.is_ok());
        assert!(source.load("demo", ModuleKind::Meta).await.is_err());
    }
}
