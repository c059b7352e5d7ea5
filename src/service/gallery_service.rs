//! Gallery Service
//!
//! User-triggered gallery operations. Every successful mutation is written
//! through to the configured store.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};

use crate::engine::Extractor;
use crate::error::{EnrollmentError, ImportError};
use crate::storage::{Gallery, GalleryEntry, GalleryStore};

use super::enrollment::Enroller;

/// One still image submitted for enrollment
#[derive(Debug, Clone)]
pub struct EnrollmentImage {
    pub name: String,
    pub data: Vec<u8>,
}

/// Result of a batch where at least one image enrolled
#[derive(Debug)]
pub struct BatchOutcome {
    pub enrolled: Vec<GalleryEntry>,
    pub failed: Vec<EnrollmentError>,
}

pub struct GalleryService {
    gallery: Arc<Gallery>,
    enroller: Enroller,
    store: Arc<dyn GalleryStore>,
}

impl GalleryService {
    pub fn new(
        gallery: Arc<Gallery>,
        extractor: Arc<dyn Extractor>,
        store: Arc<dyn GalleryStore>,
        thumbnail_size: u32,
    ) -> Self {
        Self {
            enroller: Enroller::new(extractor, gallery.clone(), thumbnail_size),
            gallery,
            store,
        }
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn list(&self) -> Arc<Vec<GalleryEntry>> {
        self.gallery.snapshot()
    }

    /// Load the persisted gallery. A missing or unreadable document leaves it empty.
    pub async fn restore(&self) -> usize {
        let document = match self.store.load().await {
            Ok(Some(document)) => document,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Could not read saved gallery: {:#}", e);
                return 0;
            }
        };

        match self.gallery.import_json(&document) {
            Ok(count) => count,
            Err(e) => {
                warn!("Ignoring corrupt saved gallery: {}", e);
                0
            }
        }
    }

    /// Enroll each image independently. Fails only when nothing enrolled.
    pub async fn enroll_batch(
        &self,
        images: Vec<EnrollmentImage>,
    ) -> Result<BatchOutcome, EnrollmentError> {
        let start = Instant::now();
        let total = images.len();
        let mut outcome = BatchOutcome {
            enrolled: Vec::new(),
            failed: Vec::new(),
        };

        for image in images {
            match self.enroller.enroll(image.data, &image.name).await {
                Ok(entry) => outcome.enrolled.push(entry),
                Err(e) => {
                    warn!("Enrollment failed: {}", e);
                    outcome.failed.push(e);
                }
            }
        }

        info!(
            "Enrolled {}/{} images in {:?}",
            outcome.enrolled.len(),
            total,
            start.elapsed()
        );
        if outcome.enrolled.is_empty() {
            return Err(EnrollmentError::NoFacesFound(total));
        }
        self.persist().await;
        Ok(outcome)
    }

    /// Delete by id; absent ids are a no-op
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.gallery.remove(id);
        if removed {
            info!("Removed gallery entry {}", id);
            self.persist().await;
        }
        removed
    }

    /// Replace the whole gallery, or leave it untouched on error
    pub async fn import(&self, document: &[u8]) -> Result<usize, ImportError> {
        let count = self.gallery.import_json(document)?;
        self.persist().await;
        Ok(count)
    }

    pub fn export(&self) -> Result<Vec<u8>> {
        self.gallery.export_json()
    }

    async fn persist(&self) {
        let saved = match self.gallery.export_json() {
            Ok(document) => self.store.save(&document).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            // The in-memory gallery stays authoritative
            warn!("Failed to persist gallery: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{frame_with_face, FakeExtractor};
    use crate::pipeline::types::fixtures::basis;
    use crate::storage::fixtures::entry_with;
    use crate::storage::{JsonFileStore, MemoryStore};
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use std::time::Duration;

    fn png_with_face(axis: u8) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(frame_with_face(axis))
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn image(name: &str, axis: u8) -> EnrollmentImage {
        EnrollmentImage {
            name: name.to_string(),
            data: png_with_face(axis),
        }
    }

    fn service_with(store: Arc<dyn GalleryStore>) -> GalleryService {
        GalleryService::new(
            Arc::new(Gallery::new()),
            Arc::new(FakeExtractor::new(Duration::ZERO)),
            store,
            64,
        )
    }

    #[tokio::test]
    async fn test_batch_with_one_faceless_image() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());

        let outcome = service
            .enroll_batch(vec![image("one.png", 1), image("two.png", 0), image("three.png", 3)])
            .await
            .unwrap();

        assert_eq!(outcome.enrolled.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(&outcome.failed[0], EnrollmentError::NoFaceDetected(n) if n == "two.png"));

        let names: Vec<_> = service.list().iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["one.png", "three.png"]);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_without_faces_is_aggregate_failure() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());

        let err = service
            .enroll_batch(vec![image("a.png", 0), image("b.png", 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, EnrollmentError::NoFacesFound(2)));
        assert!(service.list().is_empty());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutations_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let service = service_with(Arc::new(JsonFileStore::new(&path)));
        service.enroll_batch(vec![image("keep", 2), image("drop", 5)]).await.unwrap();
        let drop_id = service.list()[1].id.clone();
        assert!(service.remove(&drop_id).await);
        assert!(!service.remove(&drop_id).await);

        let restored = service_with(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(restored.restore().await, 1);
        assert_eq!(restored.list()[0].name, "keep");
        assert_eq!(restored.list()[0].embedding, basis(2));
    }

    #[tokio::test]
    async fn test_corrupt_saved_gallery_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.save(b"{ not json").await.unwrap();

        let service = service_with(store);
        assert_eq!(service.restore().await, 0);
        assert!(service.list().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_import_keeps_gallery_and_store() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store.clone());
        service.gallery().add(entry_with(basis(0)));

        let err = service.import(br#"[{"id": "a"}]"#).await.unwrap_err();
        assert!(matches!(err, ImportError::MalformedEntry { index: 0, .. }));
        assert_eq!(service.list().len(), 1);
        assert!(store.load().await.unwrap().is_none());

        let exported = service.export().unwrap();
        service.gallery().replace_all(Vec::new());
        assert_eq!(service.import(&exported).await.unwrap(), 1);
        assert!(store.load().await.unwrap().is_some());
    }
}
