//! JavaScript Runtime Module
//!
//! Executes one extension module per call. Every call gets a brand-new V8
//! isolate seeded with the host bindings, evaluates the module's top-level
//! statements, then reads a binding or invokes an export. Nothing survives
//! the call, so one extension operation can never observe another's state.
//!
//! V8 isolates are single-threaded, so each call runs on its own named
//! thread with a current-thread Tokio runtime, answering over a oneshot.

use deno_core::{v8, JsRuntime};
use lazy_static::lazy_static;
use regex::Regex;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::js_bindings::{
    create_js_runtime_with_bindings, HostServices, ERROR_VAR, INVOKE_FN, RESULT_VAR, STATUS_VAR,
};
use super::value::DynamicValue;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

/// Script evaluation or invocation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Invalid binding name: {0}")]
    InvalidBinding(String),

    #[error("Module evaluation failed: {message}")]
    Evaluation { message: String, cause: String },

    #[error("Function invocation failed: {message}")]
    Invocation { message: String, cause: String },

    #[error("Script timed out after {0}ms")]
    Timeout(u64),

    #[error("Script runtime error: {0}")]
    Runtime(String),
}

impl ScriptError {
    fn evaluation(cause: impl std::fmt::Display) -> Self {
        let cause = cause.to_string();
        ScriptError::Evaluation {
            message: first_line(&cause),
            cause,
        }
    }

    fn invocation(cause: impl std::fmt::Display) -> Self {
        let cause = cause.to_string();
        ScriptError::Invocation {
            message: first_line(&cause),
            cause,
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

enum Job {
    Read(String),
    Call(String, String),
}

/// Executes extension module sources against the host bindings
#[derive(Clone)]
pub struct ScriptRuntime {
    services: HostServices,
    timeout: Duration,
}

impl ScriptRuntime {
    pub fn new(services: HostServices, timeout: Duration) -> Self {
        Self { services, timeout }
    }

    /// Evaluate `source` and return the value bound to `name`
    ///
    /// `Ok(None)` means the binding is undefined after evaluation. Both
    /// top-level declarations and `module.exports` members are visible.
    pub async fn execute_and_read_variable(
        &self,
        extension: &str,
        source: &str,
        name: &str,
    ) -> Result<Option<DynamicValue>, ScriptError> {
        validate_identifier(name)?;
        let value = self
            .run(extension, source, Job::Read(name.to_string()))
            .await?;
        Ok(value)
    }

    /// Evaluate `source` and call the function bound to `name` with `args`
    ///
    /// Promises are awaited. An `undefined` return value comes back as
    /// [`DynamicValue::Null`].
    pub async fn execute_and_call(
        &self,
        extension: &str,
        source: &str,
        name: &str,
        args: Vec<DynamicValue>,
    ) -> Result<DynamicValue, ScriptError> {
        validate_identifier(name)?;
        let args_json = serde_json::to_string(&args.iter().map(DynamicValue::to_json).collect::<Vec<_>>())
            .map_err(|e| ScriptError::Runtime(format!("Failed to serialize arguments: {}", e)))?;
        let value = self
            .run(extension, source, Job::Call(name.to_string(), args_json))
            .await?;
        Ok(value.unwrap_or(DynamicValue::Null))
    }

    async fn run(&self, extension: &str, source: &str, job: Job) -> Result<Option<DynamicValue>, ScriptError> {
        let started = Instant::now();
        let handle = Handle::current();
        let services = self.services.clone();
        let extension_id = extension.to_string();
        let source = source.to_string();
        let (tx, rx) = oneshot::channel();
        let (isolate_tx, mut isolate_rx) = oneshot::channel::<v8::IsolateHandle>();

        thread::Builder::new()
            .name(format!("script-{}", extension))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(ScriptError::Runtime(format!("Failed to build script runtime: {}", e))));
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                let result = local.block_on(&rt, async move {
                    let mut runtime = create_js_runtime_with_bindings(services, handle, &extension_id)
                        .map_err(|e| ScriptError::Runtime(format!("{:#}", e)))?;
                    let _ = isolate_tx.send(runtime.v8_isolate().thread_safe_handle());

                    runtime
                        .execute_script("<extension>", source.into())
                        .map_err(ScriptError::evaluation)?;

                    match job {
                        Job::Read(name) => read_variable(&mut runtime, &name),
                        Job::Call(name, args_json) => call_function(&mut runtime, &name, &args_json).await.map(Some),
                    }
                });
                let _ = tx.send(result);
            })
            .map_err(|e| ScriptError::Runtime(format!("Failed to spawn script thread: {}", e)))?;

        let result = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ScriptError::Runtime("Script thread exited without a result".to_string())),
            Err(_) => {
                if let Ok(isolate) = isolate_rx.try_recv() {
                    isolate.terminate_execution();
                }
                warn!(extension = %extension, "Script exceeded {:?}, terminated", self.timeout);
                Err(ScriptError::Timeout(self.timeout.as_millis() as u64))
            }
        };

        debug!(extension = %extension, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "Script call finished");
        result
    }
}

fn validate_identifier(name: &str) -> Result<(), ScriptError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ScriptError::InvalidBinding(name.to_string()))
    }
}

/// Expression resolving `name` as a top-level binding or a CommonJS export
///
/// A module whose `exports` is itself a function answers to any name.
fn lookup_expression(name: &str) -> String {
    format!(
        "(typeof {name} !== 'undefined' ? {name} : \
         (!globalThis.module || !module.exports ? undefined : \
         (module.exports[\"{name}\"] !== undefined ? module.exports[\"{name}\"] : \
         (typeof module.exports === 'function' ? module.exports : undefined))))"
    )
}

fn read_variable(runtime: &mut JsRuntime, name: &str) -> Result<Option<DynamicValue>, ScriptError> {
    let code = format!(
        "(() => {{ const v = {}; return v === undefined ? undefined : JSON.stringify(v); }})()",
        lookup_expression(name)
    );
    let value = runtime
        .execute_script("<read_variable>", code.into())
        .map_err(ScriptError::invocation)?;

    let json = {
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        if local.is_undefined() || local.is_null() {
            return Ok(None);
        }
        local
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .ok_or_else(|| ScriptError::Runtime(format!("Value of {} is not serializable", name)))?
    };

    parse_json(&json).map(Some)
}

async fn call_function(runtime: &mut JsRuntime, name: &str, args_json: &str) -> Result<DynamicValue, ScriptError> {
    let target = runtime
        .execute_script("<resolve_function>", lookup_expression(name).into())
        .map_err(ScriptError::invocation)?;

    // Call the trampoline through the V8 API so arguments are never compiled
    {
        let scope = &mut runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);

        let invoke_name = v8::String::new(scope, INVOKE_FN)
            .ok_or_else(|| ScriptError::Runtime("Failed to allocate string".to_string()))?;
        let invoke_val = global
            .get(scope, invoke_name.into())
            .ok_or_else(|| ScriptError::Runtime(format!("{} not found", INVOKE_FN)))?;
        let invoke_func = v8::Local::<v8::Function>::try_from(invoke_val)
            .map_err(|_| ScriptError::Runtime(format!("{} is not a function", INVOKE_FN)))?;

        let name_v8 = v8::String::new(scope, name)
            .ok_or_else(|| ScriptError::Runtime("Failed to allocate string".to_string()))?;
        let target = v8::Local::new(scope, target);
        let args_v8 = v8::String::new(scope, args_json)
            .ok_or_else(|| ScriptError::Runtime("Failed to allocate string".to_string()))?;
        let args_val = v8::json::parse(scope, args_v8)
            .ok_or_else(|| ScriptError::Runtime("Failed to parse arguments JSON in V8".to_string()))?;

        let recv = v8::undefined(scope).into();
        if invoke_func.call(scope, recv, &[name_v8.into(), target, args_val]).is_none() {
            return Err(ScriptError::Runtime(format!("Failed to call {}", INVOKE_FN)));
        }
    }

    runtime
        .run_event_loop(Default::default())
        .await
        .map_err(ScriptError::invocation)?;

    let (status, result, error) = {
        let scope = &mut runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);

        let get_global_string = |scope: &mut v8::HandleScope, key: &str| -> Option<String> {
            let key_str = v8::String::new(scope, key)?;
            let val = global.get(scope, key_str.into())?;
            if val.is_undefined() || val.is_null() {
                return None;
            }
            Some(val.to_string(scope)?.to_rust_string_lossy(scope))
        };

        (
            get_global_string(scope, STATUS_VAR),
            get_global_string(scope, RESULT_VAR),
            get_global_string(scope, ERROR_VAR),
        )
    };

    match status.as_deref() {
        Some("success") => parse_json(result.as_deref().unwrap_or("null")),
        Some("missing") => Err(ScriptError::FunctionNotFound(name.to_string())),
        Some("error") => Err(ScriptError::invocation(error.unwrap_or_else(|| "Unknown error".to_string()))),
        Some("pending") => Err(ScriptError::Runtime(format!(
            "{} never settled after the event loop finished",
            name
        ))),
        other => Err(ScriptError::Runtime(format!("Invalid execution status: {:?}", other))),
    }
}

fn parse_json(json: &str) -> Result<DynamicValue, ScriptError> {
    serde_json::from_str::<serde_json::Value>(json)
        .map(DynamicValue::from)
        .map_err(|e| ScriptError::Runtime(format!("Failed to decode script result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cookies::CookieJar;
    use crate::core::storage::KeyValueStore;
    use crate::extension::browser::HostBrowser;
    use crate::extension::network::testing::StubClient;
    use crate::extension::network::HostNetwork;
    use std::sync::Arc;

    fn runtime_with(stub: StubClient, storage: KeyValueStore, timeout: Duration) -> ScriptRuntime {
        let jar = CookieJar::new();
        ScriptRuntime::new(
            HostServices {
                network: HostNetwork::new(Arc::new(stub), jar.clone()),
                browser: HostBrowser::new(None, jar, Duration::from_secs(1)),
                storage,
            },
            timeout,
        )
    }

    fn runtime() -> ScriptRuntime {
        runtime_with(StubClient::default(), KeyValueStore::in_memory().unwrap(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_read_top_level_const() {
        let source = r#"const catalog = [{title: "Movies", filter: "/movies"}, {title: "Shows", filter: "/tv"}];"#;
        let value = runtime()
            .execute_and_read_variable("demo", source, "catalog")
            .await
            .unwrap()
            .unwrap();
        let items = value.as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("filter").and_then(DynamicValue::as_str), Some("/tv"));
    }

    #[tokio::test]
    async fn test_read_module_exports_and_missing() {
        let rt = runtime();
        let source = "module.exports.genres = [{title: 'Action', filter: 'action'}];";
        let genres = rt.execute_and_read_variable("demo", source, "genres").await.unwrap();
        assert!(genres.is_some());

        let missing = rt.execute_and_read_variable("demo", source, "catalog").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_call_async_function_with_args() {
        let source = r#"
            async function getPosts(filter, page, ctx) {
                return [{title: filter + ":" + page, link: "/x", image: "", ctx: ctx === null}];
            }
        "#;
        let value = runtime()
            .execute_and_call("demo", source, "getPosts", vec!["/new".into(), 2u32.into(), DynamicValue::Null])
            .await
            .unwrap();
        let first = &value.as_sequence().unwrap()[0];
        assert_eq!(first.get("title").and_then(DynamicValue::as_str), Some("/new:2"));
        assert_eq!(first.get("ctx"), Some(&DynamicValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_call_arrow_export() {
        let source = "const getEpisodes = (link) => [{title: 'E1', link}]; module.exports = { getEpisodes };";
        let value = runtime()
            .execute_and_call("demo", source, "getEpisodes", vec!["/s1".into()])
            .await
            .unwrap();
        assert_eq!(value.as_sequence().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_function_valued_exports() {
        let source = "module.exports = function (link) { return [{title: 'S', link}]; };";
        let value = runtime()
            .execute_and_call("demo", source, "getStream", vec!["/x".into()])
            .await
            .unwrap();
        assert_eq!(value.as_sequence().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_function_not_found() {
        let rt = runtime();
        let err = rt
            .execute_and_call("demo", "const getStreams = 5;", "getStreams", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::FunctionNotFound("getStreams".into()));

        let err = rt.execute_and_call("demo", "", "getMetaData", vec![]).await.unwrap_err();
        assert_eq!(err, ScriptError::FunctionNotFound("getMetaData".into()));
    }

    #[tokio::test]
    async fn test_errors_are_tagged() {
        let rt = runtime();
        let err = rt
            .execute_and_read_variable("demo", "this is not javascript", "catalog")
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Evaluation { .. }));

        let err = rt
            .execute_and_call("demo", "function boom() { throw new Error('kaput'); }", "boom", vec![])
            .await
            .unwrap_err();
        match err {
            ScriptError::Invocation { message, cause } => {
                assert!(message.contains("kaput"));
                assert!(cause.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_binding_is_rejected_before_running() {
        let err = runtime()
            .execute_and_read_variable("demo", "", "a; b")
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::InvalidBinding("a; b".into()));
    }

    #[tokio::test]
    async fn test_scopes_do_not_leak() {
        let rt = runtime();
        let source = "globalThis.counter = (globalThis.counter || 0) + 1; const seen = counter;";
        for _ in 0..2 {
            let seen = rt.execute_and_read_variable("demo", source, "seen").await.unwrap();
            assert_eq!(seen, Some(DynamicValue::Number(1.0)));
        }
    }

    #[tokio::test]
    async fn test_raw_deno_global_is_hidden() {
        let source = r#"
            const globals = {
                deno: typeof Deno,
                core: typeof globalThis.Deno,
                network: typeof network.get,
                console: typeof console.log,
            };
        "#;
        let value = runtime()
            .execute_and_read_variable("demo", source, "globals")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.get("deno").and_then(DynamicValue::as_str), Some("undefined"));
        assert_eq!(value.get("core").and_then(DynamicValue::as_str), Some("undefined"));
        assert_eq!(value.get("network").and_then(DynamicValue::as_str), Some("function"));
        assert_eq!(value.get("console").and_then(DynamicValue::as_str), Some("function"));
    }

    #[tokio::test]
    async fn test_host_api_works_without_deno_global() {
        let source = "async function run() { console.log('hi'); storage.save('k', 'v'); return storage.load('k'); }";
        let value = runtime().execute_and_call("demo", source, "run", vec![]).await.unwrap();
        assert_eq!(value.as_str(), Some("v"));
    }

    #[tokio::test]
    async fn test_storage_persists_across_calls() {
        let rt = runtime();
        rt.execute_and_call("demo", "function put() { storage.save('demo:k', 'v'); }", "put", vec![])
            .await
            .unwrap();
        let value = rt
            .execute_and_call("demo", "function get() { return storage.load('demo:k'); }", "get", vec![])
            .await
            .unwrap();
        assert_eq!(value, DynamicValue::String("v".into()));
    }

    #[tokio::test]
    async fn test_network_from_inside_a_call() {
        let stub = StubClient::default().with_route("https://site.example/list", "<a href='/p/1'>First</a>");
        let rt = runtime_with(stub, KeyValueStore::in_memory().unwrap(), Duration::from_secs(10));
        let source = r#"
            async function getPosts(filter, page) {
                const res = await axios.get('https://site.example' + filter);
                const $ = cheerio.load(res.data);
                return $('a').map((i, el) => ({ title: $(el).text(), link: $(el).attr('href'), image: '' })).get();
            }
        "#;
        let value = rt
            .execute_and_call("demo", source, "getPosts", vec!["/list".into(), 1u32.into()])
            .await
            .unwrap();
        let posts = value.as_sequence().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].get("link").and_then(DynamicValue::as_str), Some("/p/1"));
    }

    #[tokio::test]
    async fn test_runaway_script_times_out() {
        let rt = runtime_with(StubClient::default(), KeyValueStore::in_memory().unwrap(), Duration::from_millis(300));
        let started = Instant::now();
        let err = rt
            .execute_and_call("demo", "function spin() { for (;;) {} }", "spin", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::Timeout(300));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
