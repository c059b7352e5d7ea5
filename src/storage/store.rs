//! Gallery persistence backends

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Durable home for the exported gallery document.
/// Implementations must be thread-safe and async-compatible.
#[async_trait]
pub trait GalleryStore: Send + Sync + 'static {
    /// Last saved document, `None` if nothing has been saved yet
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the saved document
    async fn save(&self, document: &[u8]) -> Result<()>;
}

/// Single JSON file on disk, replaced atomically on every save
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl GalleryStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn save(&self, document: &[u8]) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, document)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Saved gallery ({} bytes) to {}", document.len(), self.path.display());
        Ok(())
    }
}

/// Process-local store, used when persistence is disabled and in tests
#[derive(Default)]
pub struct MemoryStore {
    document: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GalleryStore for MemoryStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.document.lock().clone())
    }

    async fn save(&self, document: &[u8]) -> Result<()> {
        *self.document.lock() = Some(document.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("gallery.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_and_replaces() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/data/gallery.json"));

        store.save(b"[1]").await.unwrap();
        store.save(b"[2]").await.unwrap();

        assert_eq!(store.load().await.unwrap().as_deref(), Some(&b"[2]"[..]));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(b"[]").await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(b"[]".to_vec()));
    }
}
