//! Single-image enrollment

use std::sync::Arc;

use image::{DynamicImage, RgbImage};
use tracing::{debug, info};

use crate::engine::preprocess::decode_image;
use crate::engine::Extractor;
use crate::error::EnrollmentError;
use crate::storage::{Gallery, GalleryEntry, Thumbnail};

/// Turns one still image into one gallery entry
pub struct Enroller {
    extractor: Arc<dyn Extractor>,
    gallery: Arc<Gallery>,
    thumbnail_size: u32,
}

impl Enroller {
    pub fn new(extractor: Arc<dyn Extractor>, gallery: Arc<Gallery>, thumbnail_size: u32) -> Self {
        Self {
            extractor,
            gallery,
            thumbnail_size,
        }
    }

    /// Decode an encoded still image and enroll it under `name`
    pub async fn enroll(&self, image_data: Vec<u8>, name: &str) -> Result<GalleryEntry, EnrollmentError> {
        let image = tokio::task::spawn_blocking(move || decode_image(&image_data))
            .await
            .map_err(|e| invalid(name, e))?
            .map_err(|e| invalid(name, e))?;
        self.enroll_image(image, name).await
    }

    /// Enroll an already-decoded raster. The thumbnail is cut from the same raster.
    pub async fn enroll_image(
        &self,
        image: DynamicImage,
        name: &str,
    ) -> Result<GalleryEntry, EnrollmentError> {
        let raster: Arc<RgbImage> = Arc::new(image.to_rgb8());
        let detection = self
            .extractor
            .detect_single_best(raster)
            .await
            .map_err(|source| EnrollmentError::Extraction {
                name: name.to_string(),
                source,
            })?
            .ok_or_else(|| EnrollmentError::NoFaceDetected(name.to_string()))?;
        debug!("Best face for '{}' scored {:.3}", name, detection.score);

        let size = self.thumbnail_size;
        let thumbnail = tokio::task::spawn_blocking(move || Thumbnail::from_image(&image, size))
            .await
            .map_err(|e| invalid(name, e))?
            .map_err(|e| invalid(name, e))?;

        let entry = self
            .gallery
            .add(GalleryEntry::new(name, detection.embedding, thumbnail));
        info!("Enrolled '{}' as {}", entry.name, entry.id);
        Ok(entry)
    }
}

fn invalid(name: &str, reason: impl std::fmt::Display) -> EnrollmentError {
    EnrollmentError::InvalidImage {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
