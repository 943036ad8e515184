//! Storage and File System Abstractions
//!
//! Platform-agnostic traits for chapter file storage and durable key-value
//! settings.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app document directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn save_page(fs: &dyn FileSystemAccess, data: Bytes) -> Result<()> {
///     let root = fs.get_data_directory().await?;
///     fs.write_file(&root.join("downloads/m1/c1/0.jpg"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's data directory
    ///
    /// This directory is suitable for persistent application data.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut stack = vec![path.to_path_buf()];

        while let Some(dir) = stack.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    stack.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }

        Ok(total)
    }
}

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences storage:
/// - iOS: UserDefaults
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite-backed store
///
/// The download orchestrator keeps its durable job metadata under a single
/// key here, and sandboxed extensions get a namespaced slice of it.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Tiny in-memory tree: directories map to their children, files to a size.
    #[derive(Default)]
    struct MemoryTree {
        dirs: HashMap<PathBuf, Vec<PathBuf>>,
        files: HashMap<PathBuf, u64>,
    }

    struct TreeFs(Mutex<MemoryTree>);

    #[async_trait]
    impl FileSystemAccess for TreeFs {
        async fn get_data_directory(&self) -> Result<PathBuf> {
            Ok(PathBuf::from("/data"))
        }
        async fn exists(&self, path: &Path) -> Result<bool> {
            let tree = self.0.lock().unwrap();
            Ok(tree.dirs.contains_key(path) || tree.files.contains_key(path))
        }
        async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
            let tree = self.0.lock().unwrap();
            if tree.dirs.contains_key(path) {
                return Ok(FileMetadata {
                    size: 0,
                    modified_at: None,
                    is_directory: true,
                });
            }
            tree.files
                .get(path)
                .map(|size| FileMetadata {
                    size: *size,
                    modified_at: None,
                    is_directory: false,
                })
                .ok_or_else(|| BridgeError::OperationFailed("missing".into()))
        }
        async fn create_dir_all(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> Result<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
            let tree = self.0.lock().unwrap();
            Ok(tree.dirs.get(path).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_default_directory_size_recurses() {
        let mut tree = MemoryTree::default();
        let root = PathBuf::from("/data/downloads");
        let chapter = root.join("c1");
        tree.dirs.insert(root.clone(), vec![chapter.clone(), root.join("a.jpg")]);
        tree.dirs
            .insert(chapter.clone(), vec![chapter.join("0.jpg"), chapter.join("1.jpg")]);
        tree.files.insert(root.join("a.jpg"), 10);
        tree.files.insert(chapter.join("0.jpg"), 100);
        tree.files.insert(chapter.join("1.jpg"), 250);

        let fs = TreeFs(Mutex::new(tree));
        assert_eq!(fs.directory_size(&root).await.unwrap(), 360);
    }
}
