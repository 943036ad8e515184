//! Download page sources backed by the extension bridge.

use async_trait::async_trait;
use bytes::Bytes;
use core_downloads::{ChapterPageResolver, DownloadError, PageFetcher};
use core_extensions::ExtensionBridge;
use std::sync::Arc;
use tracing::debug;

/// Resolves chapter pages with the source extension's `getChapterDetails`.
pub struct BridgePageResolver {
    bridge: Arc<ExtensionBridge>,
}

impl BridgePageResolver {
    pub fn new(bridge: Arc<ExtensionBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ChapterPageResolver for BridgePageResolver {
    async fn resolve_pages(
        &self,
        source_id: &str,
        manga_id: &str,
        chapter_id: &str,
    ) -> core_downloads::Result<Vec<String>> {
        let details = self
            .bridge
            .chapter_details(source_id, manga_id, chapter_id)
            .await
            .map_err(|e| DownloadError::Resolver {
                chapter_id: chapter_id.to_string(),
                message: e.to_string(),
            })?;

        if details.pages.is_empty() {
            return Err(DownloadError::Resolver {
                chapter_id: chapter_id.to_string(),
                message: "chapter has no pages".to_string(),
            });
        }
        debug!(source_id, chapter_id, pages = details.pages.len(), "Resolved chapter pages");
        Ok(details.pages)
    }
}

/// Fetches page bytes through the bridge's image pipeline.
pub struct BridgePageFetcher {
    bridge: Arc<ExtensionBridge>,
}

impl BridgePageFetcher {
    pub fn new(bridge: Arc<ExtensionBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl PageFetcher for BridgePageFetcher {
    async fn fetch_image(&self, source_id: &str, url: &str) -> core_downloads::Result<Bytes> {
        self.bridge
            .fetch_image(source_id, url)
            .await
            .map(|image| image.data)
            .map_err(|e| DownloadError::Source(e.to_string()))
    }

    async fn decrypt_drm_image(
        &self,
        extension_id: &str,
        url: &str,
    ) -> core_downloads::Result<Bytes> {
        self.bridge
            .decrypt_drm_image(extension_id, url)
            .await
            .map(|image| image.data)
            .map_err(|e| DownloadError::Source(e.to_string()))
    }
}
