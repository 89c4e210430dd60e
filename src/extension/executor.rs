//! Extension Executor
//!
//! Composition root for extension operations: picks the module, runs it on
//! the [`ScriptRuntime`], marshals the result. Every failure is logged and
//! replaced by an empty result so one broken extension never breaks the
//! caller's browsing flow.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::js_runtime::{ScriptError, ScriptRuntime};
use super::marshal::{parse_list, parse_object, FromDynamic};
use super::models::{CatalogEntry, ContentInfo, Episode, Post, StreamSource};
use super::module_source::{ModuleKind, ModuleSource};
use super::value::DynamicValue;
use crate::core::error::{Result, StreamboxError};

pub struct ExtensionExecutor {
    modules: Arc<dyn ModuleSource>,
    runtime: ScriptRuntime,
}

impl ExtensionExecutor {
    pub fn new(modules: Arc<dyn ModuleSource>, runtime: ScriptRuntime) -> Self {
        Self { modules, runtime }
    }

    pub async fn get_catalog(&self, extension: &str) -> Vec<CatalogEntry> {
        self.read_list(extension, ModuleKind::Catalog, "catalog").await
    }

    pub async fn get_genres(&self, extension: &str) -> Vec<CatalogEntry> {
        self.read_list(extension, ModuleKind::Catalog, "genres").await
    }

    pub async fn get_posts(&self, extension: &str, filter: &str, page: u32) -> Vec<Post> {
        let args = vec![filter.into(), page.into(), DynamicValue::Null];
        self.call_list(extension, ModuleKind::Posts, &["getPosts"], args).await
    }

    pub async fn search_posts(&self, extension: &str, query: &str, page: u32) -> Vec<Post> {
        let args = vec![query.into(), page.into(), DynamicValue::Null];
        self.call_list(extension, ModuleKind::Posts, &["getSearchPosts"], args).await
    }

    pub async fn get_metadata(&self, extension: &str, link: &str) -> Option<ContentInfo> {
        let args = vec![link.into(), DynamicValue::Null];
        match self.call(extension, ModuleKind::Meta, &["getMetaData"], args).await {
            Ok(value) => {
                let info = parse_object::<ContentInfo>(&value);
                if info.is_none() {
                    debug!(extension = %extension, "getMetaData returned no usable object");
                }
                info
            }
            Err(e) => {
                warn!(extension = %extension, error_type = e.error_type(), "getMetaData failed: {}", e);
                None
            }
        }
    }

    /// `getStreams`, falling back to the older `getStream` export
    pub async fn get_streams(&self, extension: &str, link: &str, content_type: &str) -> Vec<StreamSource> {
        let args = vec![link.into(), content_type.into(), DynamicValue::Null];
        self.call_list(extension, ModuleKind::Stream, &["getStreams", "getStream"], args)
            .await
    }

    pub async fn get_episodes(&self, extension: &str, link: &str) -> Vec<Episode> {
        let args = vec![link.into(), DynamicValue::Null];
        self.call_list(extension, ModuleKind::Episodes, &["getEpisodes"], args).await
    }

    async fn read_list<T: FromDynamic>(&self, extension: &str, module: ModuleKind, name: &str) -> Vec<T> {
        let result = async {
            let source = self.modules.load(extension, module).await?;
            Ok::<_, StreamboxError>(self.runtime.execute_and_read_variable(extension, &source, name).await?)
        }
        .await;

        match result {
            Ok(Some(value)) => {
                let items = parse_list::<T>(&value);
                info!(extension = %extension, binding = name, count = items.len(), "Read extension list");
                items
            }
            Ok(None) => {
                debug!(extension = %extension, binding = name, "Binding is undefined");
                Vec::new()
            }
            Err(e) => {
                warn!(extension = %extension, binding = name, error_type = e.error_type(), "Failed to read binding: {}", e);
                Vec::new()
            }
        }
    }

    async fn call_list<T: FromDynamic>(
        &self,
        extension: &str,
        module: ModuleKind,
        names: &[&str],
        args: Vec<DynamicValue>,
    ) -> Vec<T> {
        match self.call(extension, module, names, args).await {
            Ok(value) => {
                let items = parse_list::<T>(&value);
                info!(extension = %extension, function = names[0], count = items.len(), "Extension call completed");
                items
            }
            Err(e) => {
                warn!(extension = %extension, function = names[0], error_type = e.error_type(), "Extension call failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Call the first of `names` the module defines
    async fn call(
        &self,
        extension: &str,
        module: ModuleKind,
        names: &[&str],
        args: Vec<DynamicValue>,
    ) -> Result<DynamicValue> {
        let source = self.modules.load(extension, module).await?;
        let mut last = None;
        for name in names {
            match self
                .runtime
                .execute_and_call(extension, &source, name, args.clone())
                .await
            {
                Err(ScriptError::FunctionNotFound(missing)) => {
                    debug!(extension = %extension, function = %missing, "Export not defined, trying next name");
                    last = Some(ScriptError::FunctionNotFound(missing));
                }
                other => return Ok(other?),
            }
        }
        Err(last
            .unwrap_or_else(|| ScriptError::FunctionNotFound(names.join("|")))
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cookies::CookieJar;
    use crate::core::storage::KeyValueStore;
    use crate::extension::browser::HostBrowser;
    use crate::extension::js_bindings::HostServices;
    use crate::extension::models::{ContentType, StreamType};
    use crate::extension::module_source::InMemoryModuleSource;
    use crate::extension::network::testing::StubClient;
    use crate::extension::network::HostNetwork;
    use std::time::Duration;

    fn executor(modules: InMemoryModuleSource) -> ExtensionExecutor {
        let jar = CookieJar::new();
        let services = HostServices {
            network: HostNetwork::new(Arc::new(StubClient::default()), jar.clone()),
            browser: HostBrowser::new(None, jar, Duration::from_secs(1)),
            storage: KeyValueStore::in_memory().unwrap(),
        };
        ExtensionExecutor::new(Arc::new(modules), ScriptRuntime::new(services, Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_catalog_entries_preserved() {
        let modules = InMemoryModuleSource::new();
        modules.insert(
            "demo",
            ModuleKind::Catalog,
            r#"
            const catalog = [
                {title: "Trending", filter: "/trending?x=1"},
                {title: "Bollywood ★", filter: "category/bollywood/"},
                {title: "", filter: ""},
            ];
            const genres = [{title: "Action", filter: "/genre/action"}];
            "#,
        );
        let exec = executor(modules);

        let catalog = exec.get_catalog("demo").await;
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0].title, "Trending");
        assert_eq!(catalog[0].filter_key, "/trending?x=1");
        assert_eq!(catalog[1].title, "Bollywood ★");

        let genres = exec.get_genres("demo").await;
        assert_eq!(genres.len(), 1);
    }

    #[tokio::test]
    async fn test_posts_and_search_receive_arguments() {
        let modules = InMemoryModuleSource::new();
        modules.insert(
            "demo",
            ModuleKind::Posts,
            r#"
            async function getPosts(filter, page, ctx) {
                return [{title: `${filter}#${page}`, link: "/p", image: "i.jpg"}];
            }
            module.exports.getSearchPosts = (query, page) => [{title: query, link: "/s/" + page, image: ""}, 42];
            "#,
        );
        let exec = executor(modules);

        let posts = exec.get_posts("demo", "/latest", 3).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].title, "/latest#3");

        let found = exec.search_posts("demo", "dune", 1).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, "/s/1");
    }

    #[tokio::test]
    async fn test_metadata_object() {
        let modules = InMemoryModuleSource::new();
        modules.insert(
            "demo",
            ModuleKind::Meta,
            r#"
            function getMetaData(link) {
                return {title: "Show", image: "", synopsis: "s", type: "series",
                        linkList: [{title: "S1", episodesLink: link + "/s1"}]};
            }
            "#,
        );
        let info = executor(modules).get_metadata("demo", "/show").await.unwrap();
        assert_eq!(info.content_type, ContentType::Series);
        assert_eq!(info.link_list[0].episodes_link.as_deref(), Some("/show/s1"));
        assert!(info.tags.is_none());
    }

    #[tokio::test]
    async fn test_streams_fall_back_to_get_stream() {
        let modules = InMemoryModuleSource::new();
        modules.insert(
            "demo",
            ModuleKind::Stream,
            r#"
            function getStream(link, type) {
                return [
                    {server: "A", link: link + ".m3u8"},
                    {server: "B", link: link, type: "automate",
                     automationRules: {steps: [{action: "extractVideoUrl", patterns: [".m3u8"]}]}},
                    {server: "C", link: link, type: "automate"},
                ];
            }
            "#,
        );
        let streams = executor(modules).get_streams("demo", "https://h/v", "movie").await;
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].stream_type, StreamType::M3u8);
        assert_eq!(streams[1].stream_type, StreamType::Automate);
        assert!(streams[1].automation_rules.as_ref().unwrap().has_steps());
    }

    #[tokio::test]
    async fn test_failures_become_empty_results() {
        let modules = InMemoryModuleSource::new();
        modules.insert("demo", ModuleKind::Episodes, "function getEpisodes() { throw new Error('site changed'); }");
        modules.insert("demo", ModuleKind::Meta, "syntax error here (");
        let exec = executor(modules);

        assert!(exec.get_episodes("demo", "/x").await.is_empty());
        assert!(exec.get_metadata("demo", "/x").await.is_none());
        assert!(exec.get_catalog("missing").await.is_empty());
        assert!(exec.get_streams("demo", "/x", "movie").await.is_empty());
    }
}
