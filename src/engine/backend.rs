//! OpenVINO-backed `Extractor`

use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use tracing::{debug, info};

use crate::config::{InferenceConfig, ModelsConfig};
use crate::error::{ExtractionError, ModelLoadError};
use crate::pipeline::types::{BoundingBox, Detection};

use super::detector::{FaceBox, FaceDetector};
use super::embedder::FaceEmbedder;
use super::pool::ModelPool;
use super::preprocess::{align_face, EMBEDDER_INPUT_SIZE};
use super::{DetectOptions, Extractor};

/// SCRFD detection + embedding on OpenVINO. CPU work runs on the blocking pool.
pub struct OpenVinoExtractor {
    pool: Arc<ModelPool>,
    detector: Arc<FaceDetector>,
    embedder: Arc<FaceEmbedder>,
    single_best: DetectOptions,
}

impl OpenVinoExtractor {
    /// `single_best` controls detection on enrollment stills
    pub fn new(inference: &InferenceConfig, models: &ModelsConfig, single_best: DetectOptions) -> Self {
        let pool = Arc::new(ModelPool::new(inference, models));
        Self {
            detector: Arc::new(FaceDetector::new(pool.clone())),
            embedder: Arc::new(FaceEmbedder::new(pool.clone())),
            pool,
            single_best,
        }
    }

    async fn run(
        &self,
        image: Arc<RgbImage>,
        options: DetectOptions,
        best_only: bool,
    ) -> Result<Vec<Detection>, ExtractionError> {
        if !self.pool.all_loaded() {
            return Err(ExtractionError::ModelsNotLoaded);
        }

        let detector = self.detector.clone();
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Detection>, ExtractionError> {
            let image = DynamicImage::ImageRgb8(image.as_ref().clone());
            let mut faces = detector.detect(&image, options.min_score, options.input_size)?;
            if best_only {
                // NMS output is sorted by confidence
                faces.truncate(1);
            }
            faces
                .iter()
                .map(|face| embed_face(&embedder, &image, face))
                .collect()
        })
        .await
        .map_err(|e| ExtractionError::Backend(e.into()))?
    }
}

fn embed_face(
    embedder: &FaceEmbedder,
    image: &DynamicImage,
    face: &FaceBox,
) -> Result<Detection, ExtractionError> {
    let has_landmarks = face.landmarks.iter().any(|&(x, y)| x != 0.0 || y != 0.0);
    let aligned = if has_landmarks {
        align_face(image, &face.landmarks)
    } else {
        // Keypoint-less detector variant: embed the plain box crop
        let (x, y) = (face.x1.max(0.0) as u32, face.y1.max(0.0) as u32);
        let w = ((face.x2 - face.x1).max(1.0) as u32).min(image.width().saturating_sub(x)).max(1);
        let h = ((face.y2 - face.y1).max(1.0) as u32).min(image.height().saturating_sub(y)).max(1);
        let (tw, th) = EMBEDDER_INPUT_SIZE;
        image
            .crop_imm(x, y, w, h)
            .resize_exact(tw, th, image::imageops::FilterType::Triangle)
    };

    Ok(Detection {
        bbox: BoundingBox::from_corners(face.x1, face.y1, face.x2, face.y2),
        score: face.confidence,
        embedding: embedder.embed(&aligned)?,
    })
}

#[async_trait]
impl Extractor for OpenVinoExtractor {
    async fn load_models(&self) -> Result<(), ModelLoadError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.load_all())
            .await
            .map_err(|e| ModelLoadError::Backend {
                model: "runtime",
                source: e.into(),
            })??;
        info!("Face models ready");
        Ok(())
    }

    fn models_loaded(&self) -> bool {
        self.pool.all_loaded()
    }

    async fn detect_all(
        &self,
        frame: Arc<RgbImage>,
        options: DetectOptions,
    ) -> Result<Vec<Detection>, ExtractionError> {
        self.run(frame, options, false).await
    }

    async fn detect_single_best(
        &self,
        image: Arc<RgbImage>,
    ) -> Result<Option<Detection>, ExtractionError> {
        let detection = self.run(image, self.single_best, true).await?.into_iter().next();
        debug!("Single-best detection: {}", detection.is_some());
        Ok(detection)
    }
}
