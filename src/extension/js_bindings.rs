//! Host API bindings for extension scripts
//!
//! This module provides the bridge between Rust and JavaScript. It implements:
//! - Deno ops backing every capability object a script can reach
//! - The init script that builds `network`, `axios`, `htmlQuery`, `cheerio`,
//!   `crypto`, `storage`, `console`, `browser` and the CommonJS shims
//! - The `__host_invoke` trampoline used by the runtime to call exports
//!
//! Ops are synchronous from the script's point of view: network and browser
//! work is spawned on the host runtime and the script thread waits for it.
//! Scripts written against a blocking API therefore work unchanged, and
//! `await` on the returned values is harmless.

use anyhow::{anyhow, Context, Result};
use deno_core::{op2, Extension, JsRuntime, Op, OpState, RuntimeOptions};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::browser::HostBrowser;
use super::html::{HtmlStore, NodeHandle};
use super::network::{HostNetwork, HttpMethod, HttpRequest, HttpResponse};
use crate::core::crypto;
use crate::core::logging::SCRIPT_TARGET;
use crate::core::storage::KeyValueStore;

/// Capabilities shared by every script scope
#[derive(Clone)]
pub struct HostServices {
    pub network: HostNetwork,
    pub browser: HostBrowser,
    pub storage: KeyValueStore,
}

/// Per-scope context placed in the op state next to [`HostServices`]
struct ScopeContext {
    handle: Handle,
    extension: String,
}

/// Run `fut` on the host runtime and wait for it from the script thread
fn block_on_host<F, T>(state: &OpState, fut: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = state.borrow::<ScopeContext>().handle.clone();
    futures::executor::block_on(handle.spawn(fut)).map_err(|e| anyhow!("host task failed: {}", e))
}

#[derive(Debug, Deserialize)]
struct ScriptRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

impl ScriptRequest {
    fn into_http(self) -> HttpRequest {
        let method = if self.method.eq_ignore_ascii_case("POST") {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        };
        let mut headers: Vec<(String, String)> = self.headers.into_iter().collect();
        let body = match self.body {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(other.to_string())
            }
        };
        HttpRequest {
            method,
            url: self.url,
            headers,
            body: if method == HttpMethod::Post { Some(body.unwrap_or_default()) } else { body },
        }
    }
}

#[op2]
#[serde]
fn op_network_request(state: &mut OpState, #[serde] request: ScriptRequest) -> Result<HttpResponse> {
    let network = state.borrow::<HostServices>().network.clone();
    let request = request.into_http();
    debug!(url = %request.url, method = ?request.method, "Script network request");
    let url = request.url.clone();
    block_on_host(state, async move { network.send(request).await })?
        .with_context(|| format!("network request to {} failed", url))
}

#[op2]
#[string]
fn op_browser_get(state: &mut OpState, #[string] url: String) -> Result<String> {
    let browser = state.borrow::<HostServices>().browser.clone();
    let target = url.clone();
    block_on_host(state, async move { browser.get(&target).await })?
        .with_context(|| format!("browser.get({}) failed", url))
}

#[op2(fast)]
fn op_html_load(state: &mut OpState, #[string] html: String) -> u32 {
    state.borrow_mut::<HtmlStore>().load(&html)
}

#[op2]
#[serde]
fn op_html_select(
    state: &mut OpState,
    #[serde] roots: Vec<NodeHandle>,
    #[string] selector: String,
) -> Result<Vec<NodeHandle>> {
    Ok(state.borrow_mut::<HtmlStore>().select(&roots, &selector)?)
}

#[op2]
#[serde]
fn op_html_filter(
    state: &mut OpState,
    #[serde] handles: Vec<NodeHandle>,
    #[string] selector: String,
) -> Result<Vec<NodeHandle>> {
    Ok(state.borrow_mut::<HtmlStore>().filter(&handles, &selector)?)
}

#[op2]
#[serde]
fn op_html_children(
    state: &mut OpState,
    #[serde] handles: Vec<NodeHandle>,
    #[string] selector: Option<String>,
) -> Result<Vec<NodeHandle>> {
    Ok(state
        .borrow_mut::<HtmlStore>()
        .children(&handles, selector.as_deref())?)
}

#[op2]
#[serde]
fn op_html_relative(
    state: &mut OpState,
    #[serde] handles: Vec<NodeHandle>,
    #[string] relation: String,
) -> Result<Vec<NodeHandle>> {
    let store = state.borrow_mut::<HtmlStore>();
    match relation.as_str() {
        "parent" => Ok(store.parent(&handles)),
        "next" => Ok(store.next(&handles)),
        "prev" => Ok(store.prev(&handles)),
        other => Err(anyhow!("unknown relation: {}", other)),
    }
}

#[op2]
#[string]
fn op_html_text(state: &mut OpState, #[serde] handles: Vec<NodeHandle>) -> String {
    state.borrow::<HtmlStore>().text(&handles)
}

#[op2]
#[string]
fn op_html_markup(state: &mut OpState, #[serde] handles: Vec<NodeHandle>, #[string] kind: String) -> Option<String> {
    let store = state.borrow::<HtmlStore>();
    if kind == "outer" {
        store.outer_html(&handles)
    } else {
        store.inner_html(&handles)
    }
}

#[op2]
#[string]
fn op_html_attr(state: &mut OpState, #[serde] handles: Vec<NodeHandle>, #[string] name: String) -> Option<String> {
    state.borrow::<HtmlStore>().attr(&handles, &name)
}

#[op2]
fn op_html_has_class(state: &mut OpState, #[serde] handles: Vec<NodeHandle>, #[string] class: String) -> bool {
    state.borrow::<HtmlStore>().has_class(&handles, &class)
}

#[op2]
#[string]
fn op_html_tag(state: &mut OpState, handle: u32) -> Option<String> {
    state.borrow::<HtmlStore>().tag_name(handle)
}

#[op2]
#[string]
fn op_crypto_md5(#[string] text: String) -> String {
    crypto::md5_hex(&text)
}

/// Empty string on any failure, like the other lenient script helpers
#[op2]
#[string]
fn op_crypto_aes_decrypt(
    state: &mut OpState,
    #[string] data: String,
    #[string] key: String,
    #[string] iv: Option<String>,
) -> String {
    match crypto::aes_cbc_decrypt(&data, &key, iv.as_deref()) {
        Ok(plain) => plain,
        Err(e) => {
            let extension = &state.borrow::<ScopeContext>().extension;
            warn!(extension = %extension, "aesDecrypt failed: {}", e);
            String::new()
        }
    }
}

#[op2]
#[string]
fn op_base64_encode(#[string] text: String) -> String {
    crypto::base64_encode(&text)
}

#[op2]
#[string]
fn op_base64_decode(#[string] encoded: String) -> String {
    crypto::base64_decode(&encoded).unwrap_or_default()
}

#[op2(fast)]
fn op_storage_save(state: &mut OpState, #[string] key: String, #[string] value: String) -> Result<()> {
    state.borrow::<HostServices>().storage.save(&key, &value)?;
    Ok(())
}

#[op2]
#[string]
fn op_storage_load(state: &mut OpState, #[string] key: String) -> Result<String> {
    Ok(state.borrow::<HostServices>().storage.load(&key)?.unwrap_or_default())
}

#[op2(fast)]
fn op_console(state: &mut OpState, #[string] level: String, #[string] message: String) {
    let extension = &state.borrow::<ScopeContext>().extension;
    match level.as_str() {
        "error" => error!(target: SCRIPT_TARGET, extension = %extension, "{}", message),
        "warn" => warn!(target: SCRIPT_TARGET, extension = %extension, "{}", message),
        "debug" => debug!(target: SCRIPT_TARGET, extension = %extension, "{}", message),
        _ => info!(target: SCRIPT_TARGET, extension = %extension, "{}", message),
    }
}

/// Name of the trampoline the runtime calls exports through
pub const INVOKE_FN: &str = "__host_invoke";
pub const STATUS_VAR: &str = "__host_status";
pub const RESULT_VAR: &str = "__host_result";
pub const ERROR_VAR: &str = "__host_error";

const INIT_SCRIPT: &str = r#"
"use strict";
(() => {
    const ops = Deno.core.ops;

    const str = (v) => (v === undefined || v === null ? "" : String(v));

    function headerMap(headers) {
        const out = {};
        if (headers && typeof headers === "object") {
            for (const key of Object.keys(headers)) {
                const value = headers[key];
                if (value !== undefined && value !== null) out[key] = String(value);
            }
        }
        return out;
    }

    function send(method, url, headers, body) {
        return ops.op_network_request({
            method,
            url: str(url),
            headers: headerMap(headers),
            body: body === undefined ? null : body,
        });
    }

    globalThis.network = Object.freeze({
        get: (url, headers) => send("GET", url, headers),
        post: (url, body, headers) => send("POST", url, headers, body === undefined ? "" : body),
    });

    function axiosResponse(resp) {
        const contentType = resp.headers["content-type"] || "";
        if (contentType.includes("json")) {
            try {
                resp.data = JSON.parse(resp.data);
            } catch (_) {
                // leave as text
            }
        }
        return resp;
    }

    globalThis.axios = Object.freeze({
        get: (url, config) => axiosResponse(send("GET", url, (config || {}).headers)),
        post: (url, data, config) =>
            axiosResponse(send("POST", url, (config || {}).headers, data === undefined ? "" : data)),
    });

    class HtmlSelection {
        constructor(handles) {
            Object.defineProperty(this, "_h", { value: handles });
            this.length = handles.length;
            if (handles.length === 1) {
                this[0] = this;
            } else {
                for (let i = 0; i < handles.length; i++) this[i] = new HtmlSelection([handles[i]]);
            }
        }
        eq(i) {
            const idx = i < 0 ? this._h.length + i : i;
            return new HtmlSelection(idx >= 0 && idx < this._h.length ? [this._h[idx]] : []);
        }
        first() { return this.eq(0); }
        last() { return this.eq(-1); }
        get(i) { return i === undefined ? this.toArray() : this[i < 0 ? this.length + i : i]; }
        toArray() {
            const out = [];
            for (let i = 0; i < this.length; i++) out.push(this[i]);
            return out;
        }
        each(fn) {
            for (let i = 0; i < this.length; i++) {
                const el = this[i];
                if (fn.call(el, i, el) === false) break;
            }
            return this;
        }
        map(fn) {
            const out = [];
            for (let i = 0; i < this.length; i++) {
                const el = this[i];
                const r = fn.call(el, i, el);
                if (r === undefined || r === null) continue;
                if (Array.isArray(r)) out.push(...r);
                else out.push(r);
            }
            out.get = function (i) { return i === undefined ? Array.from(this) : this[i]; };
            out.toArray = function () { return Array.from(this); };
            return out;
        }
        filter(test) {
            if (typeof test === "function") {
                const kept = [];
                for (let i = 0; i < this.length; i++) {
                    const el = this[i];
                    if (test.call(el, i, el)) kept.push(this._h[i]);
                }
                return new HtmlSelection(kept);
            }
            return new HtmlSelection(ops.op_html_filter(this._h, str(test)));
        }
        find(selector) { return new HtmlSelection(ops.op_html_select(this._h, str(selector))); }
        parent() { return new HtmlSelection(ops.op_html_relative(this._h, "parent")); }
        next() { return new HtmlSelection(ops.op_html_relative(this._h, "next")); }
        prev() { return new HtmlSelection(ops.op_html_relative(this._h, "prev")); }
        children(selector) {
            return new HtmlSelection(ops.op_html_children(this._h, selector === undefined ? null : str(selector)));
        }
        text() { return ops.op_html_text(this._h); }
        html() { return ops.op_html_markup(this._h, "inner"); }
        attr(name) {
            const value = ops.op_html_attr(this._h, str(name));
            return value === null ? undefined : value;
        }
        hasClass(name) { return ops.op_html_has_class(this._h, str(name)); }
        get tagName() { return this.length ? ops.op_html_tag(this._h[0]) : undefined; }
        get attribs() {
            return new Proxy({}, { get: (_, key) => (typeof key === "string" ? this.attr(key) : undefined) });
        }
    }

    function load(html) {
        const doc = ops.op_html_load(str(html));
        const root = new HtmlSelection([doc]);
        const $ = function (selector, context) {
            if (selector instanceof HtmlSelection) return selector;
            if (selector === undefined || selector === null || selector === "") return new HtmlSelection([]);
            let scope = [doc];
            if (context instanceof HtmlSelection) scope = context._h;
            else if (typeof context === "string") scope = ops.op_html_select([doc], context);
            return new HtmlSelection(ops.op_html_select(scope, str(selector)));
        };
        $.root = () => root;
        $.text = () => root.text();
        $.html = (selection) => {
            if (selection === undefined) return ops.op_html_markup([doc], "outer");
            return ops.op_html_markup($(selection)._h, "outer");
        };
        return $;
    }

    globalThis.htmlQuery = load;
    globalThis.cheerio = Object.freeze({ load });

    globalThis.crypto = Object.freeze({
        md5: (text) => ops.op_crypto_md5(str(text)),
        aesDecrypt: (data, key, iv) =>
            ops.op_crypto_aes_decrypt(str(data), str(key), iv === undefined || iv === null ? null : String(iv)),
    });

    globalThis.base64Encode = (text) => ops.op_base64_encode(str(text));
    globalThis.base64Decode = (text) => ops.op_base64_decode(str(text));
    globalThis.btoa = globalThis.base64Encode;
    globalThis.atob = globalThis.base64Decode;

    globalThis.storage = Object.freeze({
        save: (key, value) => { ops.op_storage_save(str(key), str(value)); },
        load: (key) => ops.op_storage_load(str(key)),
    });

    function format(args) {
        return args
            .map((a) => {
                if (typeof a === "string") return a;
                if (a instanceof Error) return a.stack || String(a);
                try {
                    return JSON.stringify(a);
                } catch (_) {
                    return String(a);
                }
            })
            .join(" ");
    }

    globalThis.console = Object.freeze({
        log: (...args) => ops.op_console("info", format(args)),
        info: (...args) => ops.op_console("info", format(args)),
        debug: (...args) => ops.op_console("debug", format(args)),
        warn: (...args) => ops.op_console("warn", format(args)),
        error: (...args) => ops.op_console("error", format(args)),
    });

    globalThis.browser = Object.freeze({
        get: (url) => ops.op_browser_get(str(url)),
    });

    globalThis.module = { exports: {} };
    globalThis.exports = globalThis.module.exports;
    globalThis.require = (name) => {
        switch (str(name).toLowerCase()) {
            case "axios": return globalThis.axios;
            case "cheerio":
            case "cheerio-without-node-native": return globalThis.cheerio;
            case "crypto":
            case "crypto-js": return globalThis.crypto;
            default: throw new Error(`Cannot find module '${name}'`);
        }
    };

    globalThis.__host_invoke = async function (name, target, args) {
        globalThis.__host_status = "pending";
        globalThis.__host_result = undefined;
        globalThis.__host_error = undefined;
        if (typeof target !== "function") {
            globalThis.__host_status = "missing";
            return;
        }
        try {
            const result = await target(...args);
            globalThis.__host_result = JSON.stringify(result === undefined ? null : result);
            globalThis.__host_status = "success";
        } catch (e) {
            globalThis.__host_error = e && e.stack ? String(e.stack) : String(e);
            globalThis.__host_status = "error";
        }
    };

    // Scripts reach the host only through the objects above
    delete globalThis.Deno;
})();
"#;

/// Create a JavaScript runtime with the host bindings installed
///
/// # Arguments
/// * `services` - Shared host capabilities
/// * `handle` - Runtime that network and browser work is spawned on
/// * `extension` - Extension id, used to tag script diagnostics
pub fn create_js_runtime_with_bindings(services: HostServices, handle: Handle, extension: &str) -> Result<JsRuntime> {
    let ext = Extension {
        name: "streambox_host",
        ops: std::borrow::Cow::Borrowed(&[
            op_network_request::DECL,
            op_browser_get::DECL,
            op_html_load::DECL,
            op_html_select::DECL,
            op_html_filter::DECL,
            op_html_children::DECL,
            op_html_relative::DECL,
            op_html_text::DECL,
            op_html_markup::DECL,
            op_html_attr::DECL,
            op_html_has_class::DECL,
            op_html_tag::DECL,
            op_crypto_md5::DECL,
            op_crypto_aes_decrypt::DECL,
            op_base64_encode::DECL,
            op_base64_decode::DECL,
            op_storage_save::DECL,
            op_storage_load::DECL,
            op_console::DECL,
        ]),
        ..Default::default()
    };

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ext],
        ..Default::default()
    });

    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(services);
        state.put(ScopeContext {
            handle,
            extension: extension.to_string(),
        });
        state.put(HtmlStore::new());
    }

    runtime
        .execute_script("<init_bindings>", INIT_SCRIPT.to_string().into())
        .context("Failed to initialize JavaScript bindings")?;

    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cookies::CookieJar;
    use crate::extension::network::testing::StubClient;
    use deno_core::v8;
    use std::sync::Arc;
    use std::time::Duration;

    fn services(stub: StubClient) -> HostServices {
        let jar = CookieJar::new();
        HostServices {
            network: HostNetwork::new(Arc::new(stub), jar.clone()),
            browser: HostBrowser::new(None, jar, Duration::from_secs(1)),
            storage: KeyValueStore::in_memory().unwrap(),
        }
    }

    fn eval_string(runtime: &mut JsRuntime, code: &str) -> String {
        let value = runtime
            .execute_script("<test>", code.to_string().into())
            .unwrap();
        let scope = &mut runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        local.to_string(scope).unwrap().to_rust_string_lossy(scope)
    }

    /// The runtime must live on its own thread; ops block on the test runtime
    fn with_runtime<F>(stub: StubClient, f: F) -> String
    where
        F: FnOnce(&mut JsRuntime) -> String + Send + 'static,
    {
        let handle = Handle::current();
        let services = services(stub);
        std::thread::spawn(move || {
            let mut runtime = create_js_runtime_with_bindings(services, handle, "test-ext").unwrap();
            f(&mut runtime)
        })
        .join()
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_html_query_surface() {
        let out = with_runtime(StubClient::default(), |rt| {
            eval_string(
                rt,
                r#"
                const $ = htmlQuery('<ul><li class="a"><a href="/1">One</a></li><li><a href="/2">Two</a></li></ul>');
                const items = $('li');
                const hrefs = items.map((i, el) => $(el).find('a').attr('href')).get();
                const texts = [];
                items.each(function (i) { texts.push($(this).text()); });
                JSON.stringify({
                    n: items.length,
                    hrefs,
                    texts,
                    first: items[0].hasClass('a'),
                    filtered: items.filter('.a').length,
                    parent: $('a').first().parent().next().text(),
                    missing: $('a').attr('title') === undefined,
                })
                "#,
            )
        });
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["n"], 2);
        assert_eq!(v["hrefs"], serde_json::json!(["/1", "/2"]));
        assert_eq!(v["texts"], serde_json::json!(["One", "Two"]));
        assert_eq!(v["first"], true);
        assert_eq!(v["filtered"], 1);
        assert_eq!(v["parent"], "Two");
        assert_eq!(v["missing"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_network_is_synchronous_for_scripts() {
        let stub = StubClient::default().with_route("https://site.example/page", "<b>hi</b>");
        let out = with_runtime(stub, |rt| {
            eval_string(
                rt,
                r#"
                const res = network.get('https://site.example/page', { Referer: 'https://site.example/' });
                cheerio.load(res.data)('b').text() + ':' + res.status
                "#,
            )
        });
        assert_eq!(out, "hi:200");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_crypto_storage_and_base64() {
        let out = with_runtime(StubClient::default(), |rt| {
            eval_string(
                rt,
                r#"
                storage.save('ext:key', 'v1');
                [crypto.md5('hello'), base64Decode(base64Encode('abc')), storage.load('ext:key'),
                 storage.load('nope'), crypto.aesDecrypt('garbage', 'short')].join('|')
                "#,
            )
        });
        assert_eq!(out, "5d41402abc4b2a76b9719d911017c592|abc|v1||");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_request_throws_into_script() {
        let out = with_runtime(StubClient::default(), |rt| {
            eval_string(
                rt,
                r#"
                let caught = 'no';
                try { network.get('https://down.example/'); } catch (e) { caught = 'yes'; }
                caught
                "#,
            )
        });
        assert_eq!(out, "yes");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_require_shims() {
        let out = with_runtime(StubClient::default(), |rt| {
            eval_string(
                rt,
                r#"
                const ok = require('axios') === axios && require('cheerio').load === cheerio.load;
                let missing = false;
                try { require('fs'); } catch (e) { missing = true; }
                String(ok && missing && typeof module.exports === 'object')
                "#,
            )
        });
        assert_eq!(out, "true");
    }
}
