//! The narrow capability object injected into every extension instance.
//!
//! Nothing here touches the network or storage directly: every effect is an
//! RPC to the app side of the boundary.

use async_trait::async_trait;
use bytes::Bytes;
use core_runtime::config::RpcTimeouts;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::{MenuError, Result};
use crate::image_codec::{self, Canvas, ImageSize, RasterBuffer};
use crate::network_proxy::{ProxyRequest, ProxyResponse};
use crate::rpc::RpcChannel;
use crate::settings_menu::{MenuResult, ValueBinding};

pub const FETCH_REQUEST: &str = "fetch";
pub const STORAGE_GET_REQUEST: &str = "storage.get";
pub const STORAGE_SET_REQUEST: &str = "storage.set";
pub const STORAGE_REMOVE_REQUEST: &str = "storage.remove";

#[derive(Clone)]
pub struct SandboxCapabilities {
    extension_id: String,
    rpc: Arc<RpcChannel>,
    timeouts: RpcTimeouts,
    jpeg_quality: u8,
}

impl SandboxCapabilities {
    pub fn new(
        extension_id: impl Into<String>,
        rpc: Arc<RpcChannel>,
        timeouts: RpcTimeouts,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            rpc,
            timeouts,
            jpeg_quality,
        }
    }

    /// Capabilities whose every RPC fails with a closed channel.
    #[cfg(test)]
    pub(crate) fn detached(extension_id: &str) -> Self {
        let (outbound, _) = crate::rpc::boundary();
        Self::new(
            extension_id,
            Arc::new(RpcChannel::new("detached", outbound)),
            RpcTimeouts::default(),
            90,
        )
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Issue an HTTP request through the app's network proxy.
    ///
    /// Never fails: boundary errors come back as `status: 0`.
    pub async fn fetch(&self, request: ProxyRequest) -> ProxyResponse {
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => return ProxyResponse::failure(e.to_string()),
        };
        match self
            .rpc
            .send(FETCH_REQUEST, payload, self.timeouts.network)
            .await
        {
            Ok(value) => serde_json::from_value(value)
                .unwrap_or_else(|e| ProxyResponse::failure(format!("invalid proxy response: {}", e))),
            Err(e) => ProxyResponse::failure(e.to_string()),
        }
    }

    pub async fn storage_get(&self, key: &str) -> Result<Option<Value>> {
        let value = self
            .rpc
            .send(
                STORAGE_GET_REQUEST,
                json!({"extensionId": self.extension_id, "key": key}),
                self.timeouts.generic,
            )
            .await?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    pub async fn storage_set(&self, key: &str, value: Value) -> Result<()> {
        self.rpc
            .send(
                STORAGE_SET_REQUEST,
                json!({"extensionId": self.extension_id, "key": key, "value": value}),
                self.timeouts.generic,
            )
            .await?;
        Ok(())
    }

    pub async fn storage_remove(&self, key: &str) -> Result<()> {
        self.rpc
            .send(
                STORAGE_REMOVE_REQUEST,
                json!({"extensionId": self.extension_id, "key": key}),
                self.timeouts.generic,
            )
            .await?;
        Ok(())
    }

    /// Diagnostic line shown in the app's log.
    pub fn log(&self, message: &str) {
        if self.rpc.post_log(message).is_err() {
            debug!(extension_id = %self.extension_id, "Dropped log line from detached sandbox");
        }
    }

    pub fn decode_header(&self, data: &[u8]) -> ImageSize {
        image_codec::decode_header(data)
    }

    pub fn raster(&self, data: Bytes) -> RasterBuffer {
        RasterBuffer::new(data)
    }

    pub fn canvas(&self, width: u32, height: u32) -> Canvas {
        Canvas::new(width, height, self.jpeg_quality)
    }

    /// A setting value persisted in extension storage under `key`.
    pub fn binding(&self, key: impl Into<String>, default: Value) -> Arc<StorageBinding> {
        Arc::new(StorageBinding {
            capabilities: self.clone(),
            key: key.into(),
            default,
        })
    }
}

/// Settings value backed by extension storage.
pub struct StorageBinding {
    capabilities: SandboxCapabilities,
    key: String,
    default: Value,
}

#[async_trait]
impl ValueBinding for StorageBinding {
    async fn get(&self) -> MenuResult<Value> {
        match self.capabilities.storage_get(&self.key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Ok(self.default.clone()),
            Err(e) => Err(MenuError::Resolve(e.to_string())),
        }
    }

    async fn set(&self, value: Value) -> MenuResult<()> {
        self.capabilities
            .storage_set(&self.key, value)
            .await
            .map_err(|e| MenuError::InvalidValue {
                id: self.key.clone(),
                reason: e.to_string(),
            })
    }
}
