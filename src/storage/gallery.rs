//! In-memory gallery of enrolled identities

use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ImportError;
use crate::pipeline::types::Embedding;
use crate::utils::image::{encode_jpeg, resize_with_aspect, to_data_uri};

use super::format;

/// Encoded thumbnail bytes plus their mime type
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl Thumbnail {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// JPEG thumbnail of `image` fitting inside a `size` x `size` box
    pub fn from_image(image: &DynamicImage, size: u32) -> Result<Self> {
        let small = resize_with_aspect(image, size, size);
        Ok(Self::new("image/jpeg", encode_jpeg(&small, 85)?))
    }

    pub fn to_data_uri(&self) -> String {
        to_data_uri(&self.mime, &self.bytes)
    }
}

/// An enrolled identity
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
    pub thumbnail: Thumbnail,
}

impl GalleryEntry {
    /// New entry with a freshly generated id
    pub fn new(name: impl Into<String>, embedding: Embedding, thumbnail: Thumbnail) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            embedding,
            thumbnail,
        }
    }
}

/// Ordered set of enrolled identities.
///
/// Readers take a cheap `Arc` snapshot and never see a half-applied edit.
/// Every mutation builds a new vector and swaps it in whole.
pub struct Gallery {
    entries: RwLock<Arc<Vec<GalleryEntry>>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current entries in insertion order
    pub fn snapshot(&self) -> Arc<Vec<GalleryEntry>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<GalleryEntry> {
        self.entries.read().iter().find(|e| e.id == id).cloned()
    }

    /// Append an entry, regenerating its id if it collides with an existing one.
    /// Returns the entry as stored.
    pub fn add(&self, mut entry: GalleryEntry) -> GalleryEntry {
        let mut guard = self.entries.write();
        while guard.iter().any(|e| e.id == entry.id) {
            let fresh = Uuid::new_v4().to_string();
            debug!(old = %entry.id, new = %fresh, "Gallery id collision, regenerating");
            entry.id = fresh;
        }

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(entry.clone());
        *guard = Arc::new(next);
        entry
    }

    /// Delete by id. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut guard = self.entries.write();
        if !guard.iter().any(|e| e.id == id) {
            return false;
        }
        let next: Vec<_> = guard.iter().filter(|e| e.id != id).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    /// Swap in a whole new entry set
    pub fn replace_all(&self, entries: Vec<GalleryEntry>) {
        *self.entries.write() = Arc::new(entries);
    }

    /// Serialize every entry in the interchange format
    pub fn export_json(&self) -> Result<Vec<u8>> {
        format::encode(&self.snapshot())
    }

    /// Replace the gallery with a validated import. On error nothing changes.
    pub fn import_json(&self, bytes: &[u8]) -> Result<usize, ImportError> {
        let entries = format::decode(bytes)?;
        let count = entries.len();
        self.replace_all(entries);
        info!("Imported {} gallery entries", count);
        Ok(count)
    }
}

impl Default for Gallery {
    fn default() -> Self {
        Self::new()
    }
}
