//! Page sources for the download scheduler.
//!
//! The scheduler never talks to extensions directly: it asks a
//! [`ChapterPageResolver`] for a chapter's page URLs and a [`PageFetcher`]
//! for each page's bytes. [`fetch_page`] routes DRM-tagged pages through
//! the decrypt path and everything else through the extension's own image
//! pipeline so its headers and cookies apply.

use async_trait::async_trait;
use bytes::Bytes;
use core_extensions::DrmTag;

use crate::error::Result;

/// Produces the ordered page URLs of a chapter.
#[async_trait]
pub trait ChapterPageResolver: Send + Sync {
    async fn resolve_pages(
        &self,
        source_id: &str,
        manga_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<String>>;
}

/// Fetches the bytes of one page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch through the source extension's image pipeline.
    async fn fetch_image(&self, source_id: &str, url: &str) -> Result<Bytes>;

    /// Fetch and descramble a DRM-protected page.
    async fn decrypt_drm_image(&self, extension_id: &str, url: &str) -> Result<Bytes>;
}

pub async fn fetch_page(fetcher: &dyn PageFetcher, source_id: &str, page_url: &str) -> Result<Bytes> {
    match DrmTag::parse(page_url) {
        Some(tag) => fetcher.decrypt_drm_image(&tag.extension_id, &tag.url).await,
        None => fetcher.fetch_image(source_id, page_url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Fetcher {}

        #[async_trait]
        impl PageFetcher for Fetcher {
            async fn fetch_image(&self, source_id: &str, url: &str) -> Result<Bytes>;
            async fn decrypt_drm_image(&self, extension_id: &str, url: &str) -> Result<Bytes>;
        }
    }

    #[tokio::test]
    async fn test_plain_pages_use_the_source_pipeline() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch_image()
            .with(eq("mangadex"), eq("https://cdn.example.org/1.jpg"))
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"plain")));
        fetcher.expect_decrypt_drm_image().never();

        let bytes = fetch_page(&fetcher, "mangadex", "https://cdn.example.org/1.jpg")
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(b"plain"));
    }

    #[tokio::test]
    async fn test_drm_pages_are_decrypted_by_their_extension() {
        let tagged = core_extensions::drm::tag("comix", "https://cdn.example.org/2.jpg");

        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch_image().never();
        fetcher
            .expect_decrypt_drm_image()
            .with(eq("comix"), eq("https://cdn.example.org/2.jpg"))
            .times(1)
            .returning(|_, _| Ok(Bytes::from_static(b"clear")));

        let bytes = fetch_page(&fetcher, "mangadex", &tagged).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"clear"));
    }
}
