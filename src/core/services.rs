//! Service wiring
//!
//! Builds the long-lived collaborators from a [`Config`] once, so the CLI
//! and tests share the same graph: one cookie jar and one key-value store
//! behind the script host, the executor on top, and the automation engine
//! beside it.

use std::sync::Arc;
use tracing::info;

use crate::automation::chromium::{ChromiumBridge, ChromiumRenderer};
use crate::automation::engine::AutomationEngine;
use crate::automation::http_extract::HttpExtractor;
use crate::automation::resolver::StreamResolver;
use crate::core::config::Config;
use crate::core::cookies::CookieJar;
use crate::core::error::{ErrorContext, Result};
use crate::core::storage::KeyValueStore;
use crate::extension::browser::{BrowserBridge, HostBrowser};
use crate::extension::executor::ExtensionExecutor;
use crate::extension::js_bindings::HostServices;
use crate::extension::js_runtime::ScriptRuntime;
use crate::extension::module_source::DirectoryModuleSource;
use crate::extension::network::{HostNetwork, ReqwestClient};

pub struct Services {
    pub cookies: CookieJar,
    pub storage: KeyValueStore,
    pub modules: Arc<DirectoryModuleSource>,
    pub executor: ExtensionExecutor,
    pub engine: AutomationEngine,
    pub resolver: StreamResolver,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        let cookies = CookieJar::new();
        let storage = KeyValueStore::from_config(&config.storage)?;

        let client = ReqwestClient::new(&config.runtime).context("Failed to build HTTP client")?;
        let network = HostNetwork::new(Arc::new(client), cookies.clone());

        let bridge: Arc<dyn BrowserBridge> = Arc::new(ChromiumBridge::new(config.automation.clone()));
        let browser = HostBrowser::new(Some(bridge), cookies.clone(), config.runtime.browser_timeout());

        let host = HostServices {
            network: network.clone(),
            browser,
            storage: storage.clone(),
        };
        let runtime = ScriptRuntime::new(host, config.runtime.script_timeout());

        let modules = Arc::new(DirectoryModuleSource::new(config.extensions.root_dir.clone()));
        let executor = ExtensionExecutor::new(modules.clone(), runtime);

        let engine = AutomationEngine::new(
            Arc::new(ChromiumRenderer::new(config.automation.clone())),
            config.automation.clone(),
        );
        let resolver = StreamResolver::new(engine.clone(), HttpExtractor::new(network));

        info!(
            extensions = %config.extensions.root_dir.display(),
            database = %config.storage.database_path().display(),
            "Services initialized"
        );

        Ok(Self {
            cookies,
            storage,
            modules,
            executor,
            engine,
            resolver,
        })
    }
}
