//! # Sandbox Host
//!
//! Owns the isolated execution context for one extension at a time.
//!
//! The host only talks to the outside world through its RPC channel: the app
//! sends `loadExtension` and `runMethod` requests, and the extension's network
//! and storage effects go back out as `fetch` and `storage.*` requests. The
//! context can therefore live in-process (as here), in a subprocess, or in a
//! WASM runtime without changing the protocol.
//!
//! ## Loading
//!
//! Every load clears the class registry, evaluates the script through the
//! configured [`ScriptEngine`], selects a class (exact id, case-insensitive
//! id, then the only class) and constructs it. Construction is attempted with
//! the HTML helper first and retried without it.
//!
//! ## Readiness
//!
//! As soon as its dispatch loop runs, the host sends a `ready` request. The
//! app side waits for it before issuing its first call.

pub mod capabilities;
pub mod engine;
pub mod extension;
pub mod registry;

pub use capabilities::{SandboxCapabilities, StorageBinding};
pub use engine::{ScriptEngine, StaticScriptEngine};
pub use extension::{ExtensionFactory, HomeSection, HtmlParser, SectionSink, SourceExtension};
pub use registry::ExtensionRegistry;

use async_trait::async_trait;
use core_runtime::config::{BridgeConfig, RpcTimeouts};
use core_runtime::logging::strip_url_query;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::drm;
use crate::error::{ExtensionError, Result, SandboxError};
use crate::image_codec;
use crate::network_proxy::ProxyRequest;
use crate::rpc::{spawn_dispatch, Inbound, Outbound, RequestHandler, RpcChannel};
use crate::settings_menu::{invoke_action, resolve_menu, set_value_in_menu};

pub const READY_REQUEST: &str = "ready";
pub const LOAD_EXTENSION_REQUEST: &str = "loadExtension";
pub const RUN_METHOD_REQUEST: &str = "runMethod";

pub const GET_HOME_PAGE_SECTIONS: &str = "getHomePageSections";
pub const GET_CHAPTER_DETAILS: &str = "getChapterDetails";
pub const DECRYPT_DRM_IMAGE: &str = "decryptDrmImage";
pub const FETCH_IMAGE: &str = "fetchImage";
pub const GET_SOURCE_MENU: &str = "getSourceMenu";
pub const SET_SETTING_VALUE: &str = "setSettingValue";
pub const INVOKE_SETTING_ACTION: &str = "invokeSettingAction";

/// Fallback when neither the bytes nor the response headers name a type.
const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

#[derive(Clone)]
pub struct SandboxOptions {
    pub engine: Arc<dyn ScriptEngine>,
    pub html_parser: Option<Arc<dyn HtmlParser>>,
    pub timeouts: RpcTimeouts,
    pub jpeg_quality: u8,
}

impl SandboxOptions {
    pub fn new(engine: Arc<dyn ScriptEngine>, config: &BridgeConfig) -> Self {
        Self {
            engine,
            html_parser: None,
            timeouts: config.rpc,
            jpeg_quality: config.jpeg_quality,
        }
    }

    pub fn with_html_parser(mut self, parser: Arc<dyn HtmlParser>) -> Self {
        self.html_parser = Some(parser);
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadExtensionArgs {
    extension_id: String,
    script: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunMethodArgs {
    extension_id: String,
    method: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct SettingPathArgs {
    path: String,
    #[serde(default)]
    value: Value,
}

#[derive(Clone)]
struct ActiveExtension {
    id: String,
    instance: Arc<dyn SourceExtension>,
}

pub struct SandboxHost {
    channel: Arc<RpcChannel>,
    options: SandboxOptions,
    registry: Mutex<ExtensionRegistry>,
    active: Mutex<Option<ActiveExtension>>,
}

impl SandboxHost {
    /// Start a host on its side of the boundary.
    ///
    /// Returns the dispatch task; the host lives until `inbound` closes.
    pub fn spawn(options: SandboxOptions, inbound: Inbound, outbound: Outbound) -> JoinHandle<()> {
        let channel = Arc::new(RpcChannel::new("sandbox", outbound));
        let handshake_timeout = options.timeouts.generic;
        let host = Arc::new(Self {
            channel: Arc::clone(&channel),
            options,
            registry: Mutex::new(ExtensionRegistry::new()),
            active: Mutex::new(None),
        });

        let dispatch = spawn_dispatch(Arc::clone(&channel), inbound, host);
        tokio::spawn(async move {
            match channel.send(READY_REQUEST, Value::Null, handshake_timeout).await {
                Ok(_) => debug!("Sandbox ready acknowledged"),
                Err(e) => warn!(error = %e, "Sandbox ready handshake failed"),
            }
        });
        dispatch
    }

    fn capabilities(&self, extension_id: &str) -> SandboxCapabilities {
        SandboxCapabilities::new(
            extension_id,
            Arc::clone(&self.channel),
            self.options.timeouts,
            self.options.jpeg_quality,
        )
    }

    /// Replace the active extension with `extension_id` from `script`.
    pub fn load_extension(&self, extension_id: &str, script: &str) -> Result<bool> {
        let factory = {
            let mut registry = self.registry.lock();
            *self.active.lock() = None;
            registry.clear();
            self.options.engine.evaluate(extension_id, script, &mut registry)?;
            registry.select(extension_id)?
        };

        let capabilities = self.capabilities(extension_id);
        let instance = match factory.construct(capabilities.clone(), self.options.html_parser.clone())
        {
            Ok(instance) => instance,
            Err(reason) if self.options.html_parser.is_some() => {
                debug!(extension_id, %reason, "Construction with HTML helper failed, retrying without");
                factory
                    .construct(capabilities, None)
                    .map_err(|reason| SandboxError::Load {
                        extension_id: extension_id.to_string(),
                        reason,
                    })?
            }
            Err(reason) => {
                return Err(SandboxError::Load {
                    extension_id: extension_id.to_string(),
                    reason,
                }
                .into())
            }
        };

        *self.active.lock() = Some(ActiveExtension {
            id: extension_id.to_string(),
            instance,
        });
        info!(extension_id, "Extension loaded");
        Ok(true)
    }

    fn instance(&self, extension_id: &str) -> Result<Arc<dyn SourceExtension>> {
        match self.active.lock().as_ref() {
            Some(active) if active.id == extension_id => Ok(Arc::clone(&active.instance)),
            _ => Err(SandboxError::NotLoaded(extension_id.to_string()).into()),
        }
    }

    #[instrument(skip(self, args))]
    pub async fn run_method(&self, extension_id: &str, method: &str, args: Value) -> Result<Value> {
        let instance = self.instance(extension_id)?;

        match method {
            GET_HOME_PAGE_SECTIONS => {
                let sink = SectionSink::new();
                instance.home_page_sections(&sink).await?;
                Ok(serde_json::to_value(sink.into_sections())?)
            }
            GET_CHAPTER_DETAILS => {
                let details = instance.invoke(method, args).await?;
                Ok(tag_drm_pages(extension_id, details))
            }
            DECRYPT_DRM_IMAGE | FETCH_IMAGE => {
                self.image_through_pipeline(extension_id, instance.as_ref(), method, args)
                    .await
            }
            GET_SOURCE_MENU => match instance.source_menu() {
                Some(menu) => Ok(serde_json::to_value(resolve_menu(&menu).await?)?),
                None => Ok(Value::Null),
            },
            SET_SETTING_VALUE => {
                let SettingPathArgs { path, value } = serde_json::from_value(args)?;
                let applied = match instance.source_menu() {
                    Some(menu) => set_value_in_menu(&menu, &path, value).await,
                    None => false,
                };
                Ok(Value::Bool(applied))
            }
            INVOKE_SETTING_ACTION => {
                let SettingPathArgs { path, .. } = serde_json::from_value(args)?;
                let invoked = match instance.source_menu() {
                    Some(menu) => invoke_action(&menu, &path).await,
                    None => false,
                };
                Ok(Value::Bool(invoked))
            }
            _ => instance.invoke(method, args).await,
        }
    }

    /// Fetch an image through the extension's own request pipeline so its
    /// interceptors (headers, descrambling) apply.
    async fn image_through_pipeline(
        &self,
        extension_id: &str,
        instance: &dyn SourceExtension,
        method: &str,
        args: Value,
    ) -> Result<Value> {
        let url = match &args {
            Value::String(url) => url.clone(),
            other => other
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ExtensionError::Payload(format!("{} requires a url", method)))?,
        };

        let request = instance
            .intercept_request(ProxyRequest {
                binary: true,
                ..ProxyRequest::get(url.clone())
            })
            .await?;
        let response = self.capabilities(extension_id).fetch(request.clone()).await;
        let response = instance.intercept_response(&request, response).await?;

        let (Some(data), Some(encoded)) = (response.bytes(), response.raw_data.as_deref()) else {
            return Err(ExtensionError::DrmDecode(format!(
                "{} for {} returned no binary payload (status {}{})",
                method,
                strip_url_query(&url),
                response.status,
                response
                    .error
                    .as_deref()
                    .map(|e| format!(", {}", e))
                    .unwrap_or_default()
            )));
        };

        let mime_type = image_codec::sniff_mime(&data)
            .map(str::to_string)
            .or_else(|| {
                response
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .map(|(_, value)| value.clone())
                    .filter(|value| value.starts_with("image/"))
            })
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());

        Ok(json!({"mimeType": mime_type, "base64": encoded}))
    }

    async fn dispatch(&self, kind: &str, payload: Value) -> Result<Value> {
        match kind {
            LOAD_EXTENSION_REQUEST => {
                let args: LoadExtensionArgs = serde_json::from_value(payload)?;
                self.load_extension(&args.extension_id, &args.script)
                    .map(Value::Bool)
                    .inspect_err(|e| {
                        warn!(extension_id = %args.extension_id, error = %e, "Extension failed to load")
                    })
            }
            RUN_METHOD_REQUEST => {
                let args: RunMethodArgs = serde_json::from_value(payload)?;
                self.run_method(&args.extension_id, &args.method, args.args)
                    .await
            }
            other => Err(ExtensionError::Payload(format!(
                "unknown sandbox request {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl RequestHandler for SandboxHost {
    async fn handle(&self, kind: &str, payload: Value) -> std::result::Result<Value, String> {
        self.dispatch(kind, payload).await.map_err(|e| e.to_string())
    }
}

/// Reduce a chapter's pages to URL strings, tagging DRM pages.
///
/// A page is DRM-protected when the extension returned it as
/// `{"url": ..., "drm": true}` or its URL carries the DRM query marker.
pub fn tag_drm_pages(extension_id: &str, mut details: Value) -> Value {
    if let Some(pages) = details.get_mut("pages").and_then(Value::as_array_mut) {
        let normalized: Vec<Value> = std::mem::take(pages)
            .into_iter()
            .filter_map(|page| normalize_page(extension_id, page))
            .map(Value::String)
            .collect();
        *pages = normalized;
    }
    details
}

fn normalize_page(extension_id: &str, page: Value) -> Option<String> {
    let (url, flagged) = match page {
        Value::String(url) => (url, false),
        Value::Object(map) => {
            let url = map.get("url")?.as_str()?.to_string();
            let flagged = map.get("drm").and_then(Value::as_bool).unwrap_or(false);
            (url, flagged)
        }
        other => {
            debug!(extension_id, page = %other, "Dropping unrecognized page entry");
            return None;
        }
    };

    if drm::is_tagged(&url) || !(flagged || drm::has_query_marker(&url)) {
        Some(url)
    } else {
        Some(drm::tag(extension_id, &url))
    }
}
