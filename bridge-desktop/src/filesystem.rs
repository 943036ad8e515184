//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Chapter pages land under the data directory, which defaults to the
/// platform data dir (`~/.local/share/offline-reader` on Linux).
pub struct TokioFileSystem {
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the default data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("offline-reader");

        Self { data_dir }
    }

    /// Create a new file system accessor rooted at `data_dir`
    pub fn with_data_directory(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.data_dir)
            .await
            .map_err(Self::map_io_error)?
        {
            fs::create_dir_all(&self.data_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.data_dir, "Created data directory");
        }
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted directory");
                Ok(())
            }
            // Already gone
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_dir(name: &str) -> PathBuf {
        env::temp_dir().join(format!("offline-reader-fs-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_custom_data_directory_is_created() {
        let data = scratch_dir("data");
        let fs = TokioFileSystem::with_data_directory(data.clone());

        let dir = fs.get_data_directory().await.unwrap();
        assert_eq!(dir, data);
        assert!(fs.exists(&data).await.unwrap());

        fs.delete_dir_all(&data).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_read_and_size() {
        let root = scratch_dir("pages");
        let fs = TokioFileSystem::with_data_directory(root.clone());

        let page = root.join("m1").join("c1").join("0.jpg");
        fs.write_file(&page, Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        fs.write_file(&root.join("m1").join("c1").join("1.jpg"), Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert_eq!(fs.read_file(&page).await.unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(fs.directory_size(&root).await.unwrap(), 13);

        fs.delete_dir_all(&root).await.unwrap();
        assert!(!fs.exists(&root).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_directory_is_ok() {
        let fs = TokioFileSystem::with_data_directory(scratch_dir("unused"));
        fs.delete_dir_all(&scratch_dir("never-created")).await.unwrap();
    }
}
