//! Durable store of [`DownloadedChapterRecord`]s.
//!
//! All records live as one JSON array under [`RECORDS_KEY`] in the host
//! [`SettingsStore`]. Every mutation is a read-modify-write of the whole
//! array, serialized by an async mutex so concurrent chapter completions do
//! not lose each other's records.

use bridge_traits::SettingsStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DownloadError, Result};
use crate::job::DownloadedChapterRecord;

pub const RECORDS_KEY: &str = "downloads.chapters";

pub struct DownloadRecordStore {
    settings: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
}

impl DownloadRecordStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn all(&self) -> Result<Vec<DownloadedChapterRecord>> {
        let stored = self
            .settings
            .get_string(RECORDS_KEY)
            .await
            .map_err(|e| DownloadError::Storage(format!("reading download records: {}", e)))?;
        match stored {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn for_manga(&self, manga_id: &str) -> Result<Vec<DownloadedChapterRecord>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|r| r.manga_id == manga_id)
            .collect())
    }

    pub async fn get(&self, chapter_id: &str) -> Result<Option<DownloadedChapterRecord>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|r| r.chapter_id == chapter_id))
    }

    /// Append `record`, replacing an older record for the same chapter.
    pub async fn append(&self, record: DownloadedChapterRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.all().await?;
        records.retain(|r| r.chapter_id != record.chapter_id);
        debug!(chapter_id = %record.chapter_id, pages = record.pages.len(), "Recording downloaded chapter");
        records.push(record);
        self.save(&records).await
    }

    /// Remove the record for `chapter_id`, returning it if it existed.
    pub async fn remove(&self, chapter_id: &str) -> Result<Option<DownloadedChapterRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.all().await?;
        let Some(position) = records.iter().position(|r| r.chapter_id == chapter_id) else {
            return Ok(None);
        };
        let removed = records.remove(position);
        self.save(&records).await?;
        Ok(Some(removed))
    }

    async fn save(&self, records: &[DownloadedChapterRecord]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.settings
            .set_string(RECORDS_KEY, &raw)
            .await
            .map_err(|e| DownloadError::Storage(format!("writing download records: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use parking_lot::Mutex as SyncMutex;

    mock! {
        Settings {}

        #[async_trait]
        impl SettingsStore for Settings {
            async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()>;
            async fn get_string(&self, key: &str) -> BridgeResult<Option<String>>;
            async fn delete(&self, key: &str) -> BridgeResult<()>;
            async fn list_keys(&self) -> BridgeResult<Vec<String>>;
        }
    }

    fn backed_settings() -> MockSettings {
        let cell = Arc::new(SyncMutex::new(None::<String>));
        let mut settings = MockSettings::new();
        let read = Arc::clone(&cell);
        settings
            .expect_get_string()
            .withf(|key| key == RECORDS_KEY)
            .returning(move |_| Ok(read.lock().clone()));
        let write = Arc::clone(&cell);
        settings
            .expect_set_string()
            .withf(|key, _| key == RECORDS_KEY)
            .returning(move |_, value| {
                *write.lock() = Some(value.to_string());
                Ok(())
            });
        settings
    }

    fn record(manga_id: &str, chapter_id: &str) -> DownloadedChapterRecord {
        DownloadedChapterRecord {
            manga_id: manga_id.to_string(),
            chapter_id: chapter_id.to_string(),
            chapter_number: 1.0,
            chapter_title: format!("Chapter {}", chapter_id),
            manga_title: format!("Manga {}", manga_id),
            manga_cover: None,
            source_id: "src".to_string(),
            pages: vec![format!("file:///{}/{}/0.jpg", manga_id, chapter_id)],
            downloaded_at: 1_700_000_000_000,
            size: 42,
        }
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = DownloadRecordStore::new(Arc::new(backed_settings()));
        assert!(store.all().await.unwrap().is_empty());
        assert!(store.remove("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_replace_and_remove() {
        let store = DownloadRecordStore::new(Arc::new(backed_settings()));
        store.append(record("m1", "c1")).await.unwrap();
        store.append(record("m1", "c2")).await.unwrap();
        store.append(record("m2", "c3")).await.unwrap();

        let mut updated = record("m1", "c1");
        updated.size = 99;
        store.append(updated).await.unwrap();

        assert_eq!(store.all().await.unwrap().len(), 3);
        assert_eq!(store.for_manga("m1").await.unwrap().len(), 2);
        assert_eq!(store.get("c1").await.unwrap().unwrap().size, 99);

        let removed = store.remove("c2").await.unwrap().unwrap();
        assert_eq!(removed.chapter_id, "c2");
        assert!(store.get("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_array_is_an_error() {
        let mut settings = MockSettings::new();
        settings
            .expect_get_string()
            .returning(|_| Ok(Some("not json".to_string())));
        let store = DownloadRecordStore::new(Arc::new(settings));
        assert!(store.all().await.is_err());
    }
}
