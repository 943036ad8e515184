//! Installed extensions and their cached script bodies.

use bridge_traits::{HttpClient, HttpMethod, HttpRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExtensionError, Result};

const SCRIPT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub version: String,
    pub script_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

pub struct ExtensionCatalog {
    http: Arc<dyn HttpClient>,
    extensions: RwLock<Vec<Extension>>,
    scripts: RwLock<HashMap<String, Arc<str>>>,
    disabled: RwLock<HashSet<String>>,
}

impl ExtensionCatalog {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            extensions: RwLock::new(Vec::new()),
            scripts: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Install or update an extension. An update drops the cached script and
    /// re-enables the extension.
    pub fn register(&self, extension: Extension) {
        let id = extension.id.clone();
        {
            let mut extensions = self.extensions.write();
            match extensions.iter_mut().find(|e| e.id == id) {
                Some(existing) => *existing = extension,
                None => extensions.push(extension),
            }
        }
        self.scripts.write().remove(&id);
        self.disabled.write().remove(&id);
        info!(extension_id = %id, "Extension registered");
    }

    pub fn remove(&self, extension_id: &str) -> bool {
        self.scripts.write().remove(extension_id);
        self.disabled.write().remove(extension_id);
        let mut extensions = self.extensions.write();
        let before = extensions.len();
        extensions.retain(|e| e.id != extension_id);
        extensions.len() != before
    }

    /// Seed the script cache, e.g. from a bundled copy.
    pub fn install_script(&self, extension_id: &str, script: impl Into<Arc<str>>) {
        self.scripts
            .write()
            .insert(extension_id.to_string(), script.into());
    }

    pub fn get(&self, extension_id: &str) -> Option<Extension> {
        self.extensions
            .read()
            .iter()
            .find(|e| e.id == extension_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Extension> {
        self.extensions.read().clone()
    }

    /// Script body for `extension_id`, fetched on first use.
    pub async fn script(&self, extension_id: &str) -> Result<Arc<str>> {
        let cached = self.scripts.read().get(extension_id).cloned();
        if let Some(script) = cached {
            return Ok(script);
        }

        let extension = self
            .get(extension_id)
            .ok_or_else(|| ExtensionError::UnknownExtension(extension_id.to_string()))?;

        debug!(extension_id, url = %extension.script_url, "Fetching extension script");
        let request = HttpRequest::new(HttpMethod::Get, extension.script_url.clone())
            .timeout(SCRIPT_FETCH_TIMEOUT);
        let response = self.http.execute(request).await.map_err(|e| ExtensionError::ScriptFetch {
            extension_id: extension_id.to_string(),
            reason: e.to_string(),
        })?;
        if !response.is_success() {
            warn!(extension_id, status = response.status, "Extension script fetch failed");
            return Err(ExtensionError::ScriptFetch {
                extension_id: extension_id.to_string(),
                reason: format!("HTTP {}", response.status),
            });
        }

        let script: Arc<str> = response.text()?.into();
        self.scripts
            .write()
            .insert(extension_id.to_string(), Arc::clone(&script));
        Ok(script)
    }

    pub fn disable(&self, extension_id: &str) {
        self.disabled.write().insert(extension_id.to_string());
    }

    pub fn enable(&self, extension_id: &str) {
        self.disabled.write().remove(extension_id);
    }

    pub fn is_disabled(&self, extension_id: &str) -> bool {
        self.disabled.read().contains(extension_id)
    }
}
