//! # Extension Bridge
//!
//! App-side endpoint of the sandbox boundary.
//!
//! The bridge loads extensions on demand, forwards method calls into the
//! sandbox, and serves the requests the sandbox makes back: `ready`, `fetch`
//! (through the [`NetworkProxy`]), and `storage.get`/`storage.set`/
//! `storage.remove` (against the host [`SettingsStore`], namespaced per
//! extension).
//!
//! Only one extension is active at a time. Switching extensions takes the
//! `active` lock exclusively, so a switch never happens underneath a call in
//! flight.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bridge_traits::{HttpClient, SettingsStore};
use bytes::Bytes;
use core_runtime::config::{BridgeConfig, RpcTimeouts};
use core_runtime::events::{CoreEvent, EventBus, ExtensionEvent};
use core_runtime::logging::EXTENSION_LOG_TARGET;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ExtensionCatalog;
use crate::error::{ExtensionError, Result, RpcError, SandboxError};
use crate::network_proxy::{NetworkProxy, ProxyRequest};
use crate::rpc::{boundary, spawn_dispatch, Inbound, Outbound, RequestHandler, RpcChannel};
use crate::sandbox::capabilities::{
    FETCH_REQUEST, STORAGE_GET_REQUEST, STORAGE_REMOVE_REQUEST, STORAGE_SET_REQUEST,
};
use crate::sandbox::{
    HomeSection, SandboxHost, SandboxOptions, DECRYPT_DRM_IMAGE, FETCH_IMAGE,
    GET_CHAPTER_DETAILS, GET_HOME_PAGE_SECTIONS, GET_SOURCE_MENU, INVOKE_SETTING_ACTION,
    LOAD_EXTENSION_REQUEST, READY_REQUEST, RUN_METHOD_REQUEST, SET_SETTING_VALUE,
};
use crate::settings_menu::MenuTree;

/// Prefix of every extension storage key in the host settings store.
pub const STORAGE_NAMESPACE: &str = "extension";

/// Host capabilities the bridge serves sandbox requests with.
#[derive(Clone)]
pub struct BridgeServices {
    pub http: Arc<dyn HttpClient>,
    pub settings: Arc<dyn SettingsStore>,
    pub events: Option<EventBus>,
    pub config: BridgeConfig,
}

/// Timeout for a `runMethod` call of `method`.
pub fn timeout_for(method: &str, timeouts: &RpcTimeouts) -> Duration {
    match method {
        DECRYPT_DRM_IMAGE | FETCH_IMAGE => timeouts.network,
        _ => timeouts.generic,
    }
}

pub fn storage_key(extension_id: &str, key: &str) -> String {
    format!("{}.{}.{}", STORAGE_NAMESPACE, extension_id, key)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterDetails {
    pub id: String,
    pub manga_id: String,
    /// Plain or `drm://` tagged page URLs, in reading order
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagePayload {
    mime_type: String,
    base64: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageArgs {
    extension_id: String,
    key: String,
    #[serde(default)]
    value: Value,
}

/// Serves the sandbox's requests.
struct AppHandler {
    proxy: NetworkProxy,
    settings: Arc<dyn SettingsStore>,
    ready: watch::Sender<bool>,
    active: Arc<RwLock<Option<String>>>,
    events: Option<EventBus>,
}

impl AppHandler {
    async fn serve(&self, kind: &str, payload: Value) -> Result<Value> {
        match kind {
            READY_REQUEST => {
                self.ready.send_replace(true);
                debug!("Sandbox reported ready");
                Ok(Value::Bool(true))
            }
            FETCH_REQUEST => {
                let request: ProxyRequest = serde_json::from_value(payload)?;
                Ok(serde_json::to_value(self.proxy.fetch(request).await)?)
            }
            STORAGE_GET_REQUEST => {
                let args: StorageArgs = serde_json::from_value(payload)?;
                let stored = self
                    .settings
                    .get_string(&storage_key(&args.extension_id, &args.key))
                    .await?;
                Ok(match stored {
                    Some(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
                    None => Value::Null,
                })
            }
            STORAGE_SET_REQUEST => {
                let args: StorageArgs = serde_json::from_value(payload)?;
                self.settings
                    .set_string(
                        &storage_key(&args.extension_id, &args.key),
                        &serde_json::to_string(&args.value)?,
                    )
                    .await?;
                Ok(Value::Null)
            }
            STORAGE_REMOVE_REQUEST => {
                let args: StorageArgs = serde_json::from_value(payload)?;
                self.settings
                    .delete(&storage_key(&args.extension_id, &args.key))
                    .await?;
                Ok(Value::Null)
            }
            other => Err(ExtensionError::Payload(format!(
                "unknown app request {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl RequestHandler for AppHandler {
    async fn handle(&self, kind: &str, payload: Value) -> std::result::Result<Value, String> {
        self.serve(kind, payload).await.map_err(|e| e.to_string())
    }

    fn on_log(&self, message: &str) {
        // Held exclusively only while switching extensions
        let extension_id = self
            .active
            .try_read()
            .ok()
            .and_then(|active| active.clone());
        info!(target: EXTENSION_LOG_TARGET, extension_id = ?extension_id, "{}", message);

        if let Some(events) = &self.events {
            events
                .emit(CoreEvent::Extension(ExtensionEvent::Log {
                    extension_id,
                    message: message.to_string(),
                }))
                .ok();
        }
    }
}

pub struct ExtensionBridge {
    channel: Arc<RpcChannel>,
    ready: watch::Receiver<bool>,
    active: Arc<RwLock<Option<String>>>,
    catalog: Arc<ExtensionCatalog>,
    events: Option<EventBus>,
    timeouts: RpcTimeouts,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtensionBridge {
    /// Connect to a sandbox reachable through `outbound` / `inbound`.
    pub fn connect(
        services: BridgeServices,
        catalog: Arc<ExtensionCatalog>,
        outbound: Outbound,
        inbound: Inbound,
    ) -> Self {
        let channel = Arc::new(RpcChannel::new("app", outbound));
        let (ready_tx, ready_rx) = watch::channel(false);
        let active = Arc::new(RwLock::new(None));

        let handler = Arc::new(AppHandler {
            proxy: NetworkProxy::new(services.http, services.config.proxy.clone()),
            settings: services.settings,
            ready: ready_tx,
            active: Arc::clone(&active),
            events: services.events.clone(),
        });
        let dispatch = spawn_dispatch(Arc::clone(&channel), inbound, handler);

        Self {
            channel,
            ready: ready_rx,
            active,
            catalog,
            events: services.events,
            timeouts: services.config.rpc,
            tasks: Mutex::new(vec![dispatch]),
        }
    }

    /// Start an in-process sandbox host and connect to it.
    pub fn start(
        services: BridgeServices,
        catalog: Arc<ExtensionCatalog>,
        options: SandboxOptions,
    ) -> Self {
        let (to_sandbox, sandbox_inbound) = boundary();
        let (to_app, app_inbound) = boundary();

        let sandbox = SandboxHost::spawn(options, sandbox_inbound, to_app);
        let bridge = Self::connect(services, catalog, to_sandbox, app_inbound);
        bridge.tasks.lock().push(sandbox);
        bridge
    }

    pub fn catalog(&self) -> &Arc<ExtensionCatalog> {
        &self.catalog
    }

    pub async fn active_extension(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Wait for the sandbox's readiness acknowledgment.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.clone();
        let outcome = tokio::time::timeout(self.timeouts.generic, ready.wait_for(|ready| *ready))
            .await
            .map(|seen| seen.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RpcError::ChannelClosed.into()),
            Err(_) => Err(RpcError::Timeout {
                kind: READY_REQUEST.to_string(),
                request_id: 0,
                after_ms: self.timeouts.generic.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Load `extension_id` into the sandbox, replacing the active one even if
    /// it is the same extension.
    pub async fn load_extension(&self, extension_id: &str) -> Result<()> {
        let mut active = self.active.write().await;
        *active = None;
        self.load_locked(extension_id).await?;
        *active = Some(extension_id.to_string());
        Ok(())
    }

    /// Make `extension_id` the active extension unless it already is.
    pub async fn ensure_loaded(&self, extension_id: &str) -> Result<()> {
        self.acquire(extension_id).await.map(|_| ())
    }

    async fn acquire(&self, extension_id: &str) -> Result<RwLockReadGuard<'_, Option<String>>> {
        if self.catalog.is_disabled(extension_id) {
            return Err(SandboxError::Disabled(extension_id.to_string()).into());
        }

        {
            let active = self.active.read().await;
            if active.as_deref() == Some(extension_id) {
                return Ok(active);
            }
        }

        let mut active = self.active.write().await;
        if active.as_deref() != Some(extension_id) {
            *active = None;
            self.load_locked(extension_id).await?;
            *active = Some(extension_id.to_string());
        }
        Ok(active.downgrade())
    }

    async fn load_locked(&self, extension_id: &str) -> Result<()> {
        let outcome = self.send_load(extension_id).await;
        match &outcome {
            Ok(()) => {
                info!(extension_id, "Extension active");
                self.emit(ExtensionEvent::Loaded {
                    extension_id: extension_id.to_string(),
                });
            }
            Err(e) => {
                if matches!(e, ExtensionError::Sandbox(SandboxError::Load { .. })) {
                    warn!(extension_id, error = %e, "Disabling extension after load failure");
                    self.catalog.disable(extension_id);
                } else {
                    warn!(extension_id, error = %e, "Extension load failed");
                }
                self.emit(ExtensionEvent::LoadFailed {
                    extension_id: extension_id.to_string(),
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    async fn send_load(&self, extension_id: &str) -> Result<()> {
        let script = self.catalog.script(extension_id).await?;
        self.wait_ready().await?;

        let payload = json!({"extensionId": extension_id, "script": &*script});
        match self
            .channel
            .send(LOAD_EXTENSION_REQUEST, payload, self.timeouts.generic)
            .await
        {
            Ok(_) => Ok(()),
            Err(RpcError::Remote { message, .. }) => Err(SandboxError::Load {
                extension_id: extension_id.to_string(),
                reason: message,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Call `method` on `extension_id`, loading it first if needed.
    #[instrument(skip(self, args))]
    pub async fn run_method(&self, extension_id: &str, method: &str, args: Value) -> Result<Value> {
        let _active = self.acquire(extension_id).await?;

        let payload = json!({"extensionId": extension_id, "method": method, "args": args});
        self.channel
            .send(RUN_METHOD_REQUEST, payload, timeout_for(method, &self.timeouts))
            .await
            .map_err(|e| match e {
                RpcError::Remote { message, .. } => ExtensionError::method(method, message),
                other => other.into(),
            })
    }

    pub async fn home_page_sections(&self, extension_id: &str) -> Result<Vec<HomeSection>> {
        let value = self
            .run_method(extension_id, GET_HOME_PAGE_SECTIONS, Value::Null)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn chapter_details(
        &self,
        extension_id: &str,
        manga_id: &str,
        chapter_id: &str,
    ) -> Result<ChapterDetails> {
        let value = self
            .run_method(
                extension_id,
                GET_CHAPTER_DETAILS,
                json!({"mangaId": manga_id, "chapterId": chapter_id}),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch and descramble a page tagged `drm://<extension_id>/<url>`.
    pub async fn decrypt_drm_image(&self, extension_id: &str, url: &str) -> Result<EncodedImage> {
        self.image(extension_id, DECRYPT_DRM_IMAGE, url).await
    }

    /// Fetch a page image through the extension's request pipeline.
    pub async fn fetch_image(&self, extension_id: &str, url: &str) -> Result<EncodedImage> {
        self.image(extension_id, FETCH_IMAGE, url).await
    }

    async fn image(&self, extension_id: &str, method: &str, url: &str) -> Result<EncodedImage> {
        let value = self
            .run_method(extension_id, method, json!({"url": url}))
            .await
            .map_err(|e| match e {
                ExtensionError::Method { message, .. } => ExtensionError::DrmDecode(message),
                other => other,
            })?;
        let payload: ImagePayload = serde_json::from_value(value)
            .map_err(|e| ExtensionError::DrmDecode(format!("malformed image payload: {}", e)))?;
        let data = BASE64
            .decode(payload.base64.as_bytes())
            .map_err(|e| ExtensionError::DrmDecode(format!("invalid base64: {}", e)))?;
        Ok(EncodedImage {
            mime_type: payload.mime_type,
            data: Bytes::from(data),
        })
    }

    /// Resolved settings menu, `None` if the extension declares none.
    pub async fn source_menu(&self, extension_id: &str) -> Result<Option<MenuTree>> {
        let value = self
            .run_method(extension_id, GET_SOURCE_MENU, Value::Null)
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    pub async fn set_setting_value(&self, extension_id: &str, path: &str, value: Value) -> Result<bool> {
        let applied = self
            .run_method(extension_id, SET_SETTING_VALUE, json!({"path": path, "value": value}))
            .await?;
        Ok(applied.as_bool().unwrap_or(false))
    }

    pub async fn invoke_setting_action(&self, extension_id: &str, path: &str) -> Result<bool> {
        let invoked = self
            .run_method(extension_id, INVOKE_SETTING_ACTION, json!({"path": path}))
            .await?;
        Ok(invoked.as_bool().unwrap_or(false))
    }

    /// Stop the dispatch loop and the in-process sandbox, failing pending calls.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.channel.close();
    }

    fn emit(&self, event: ExtensionEvent) {
        if let Some(events) = &self.events {
            events.emit(CoreEvent::Extension(event)).ok();
        }
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_per_method() {
        let timeouts = RpcTimeouts::default();
        assert_eq!(timeout_for("getMangaDetails", &timeouts), Duration::from_secs(30));
        assert_eq!(timeout_for("decryptDrmImage", &timeouts), Duration::from_secs(60));
        assert_eq!(timeout_for("fetchImage", &timeouts), Duration::from_secs(60));
    }

    #[test]
    fn test_storage_key_is_namespaced() {
        assert_eq!(storage_key("mangadex", "lang"), "extension.mangadex.lang");
    }

    #[test]
    fn test_chapter_details_tolerates_missing_fields() {
        let details: ChapterDetails =
            serde_json::from_value(json!({"pages": ["https://a.b/1.jpg"]})).unwrap();
        assert_eq!(details.pages.len(), 1);
        assert!(details.id.is_empty());
    }
}
