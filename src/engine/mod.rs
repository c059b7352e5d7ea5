//! Face extraction engine
//!
//! The pipeline only sees the `Extractor` trait: load the models once, then
//! ask for every face in a frame or the single best face in a still image.
//! The bundled backend runs an SCRFD detector and a 128-d embedding model
//! through OpenVINO.

pub mod pool;
pub mod detector;
pub mod embedder;
pub mod preprocess;
pub mod backend;

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;

use crate::error::{ExtractionError, ModelLoadError};
use crate::pipeline::types::Detection;

pub use pool::ModelPool;
pub use detector::FaceDetector;
pub use embedder::FaceEmbedder;
pub use backend::OpenVinoExtractor;

/// Detector knobs for one `detect_all` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    /// Minimum detector score for a face to be kept
    pub min_score: f32,
    /// Square network input size in pixels
    pub input_size: u32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            input_size: 640,
        }
    }
}

/// Detection + embedding capability consumed by the pipeline.
///
/// Calls may take tens to hundreds of milliseconds; callers must never block
/// frame rendering on them.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Load every model the extractor needs. Must complete before detection.
    async fn load_models(&self) -> Result<(), ModelLoadError>;

    fn models_loaded(&self) -> bool;

    /// Every face in `frame` scoring at least `options.min_score`
    async fn detect_all(
        &self,
        frame: Arc<RgbImage>,
        options: DetectOptions,
    ) -> Result<Vec<Detection>, ExtractionError>;

    /// The highest-scoring face in a still image, if any
    async fn detect_single_best(
        &self,
        image: Arc<RgbImage>,
    ) -> Result<Option<Detection>, ExtractionError>;
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Scripted extractor for pipeline and enrollment tests.
    //!
    //! A frame "contains a face" when its top-left pixel has a non-zero red
    //! channel; the red value picks the embedding axis.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::pipeline::types::fixtures::{basis, detection_at};
    use crate::pipeline::types::EMBEDDING_DIM;

    pub struct FakeExtractor {
        pub loaded: AtomicBool,
        pub fail: AtomicBool,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        in_flight: AtomicUsize,
    }

    impl FakeExtractor {
        pub fn new(delay: Duration) -> Self {
            Self {
                loaded: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                delay,
                calls: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
            }
        }

        pub fn unloaded() -> Self {
            let fake = Self::new(Duration::ZERO);
            fake.loaded.store(false, Ordering::SeqCst);
            fake
        }
    }

    /// Image whose top-left pixel encodes `axis`; 0 means no face
    pub fn frame_with_face(axis: u8) -> RgbImage {
        let mut image = RgbImage::new(64, 48);
        image.put_pixel(0, 0, image::Rgb([axis, 0, 0]));
        image
    }

    fn faces_in(frame: &RgbImage) -> Vec<Detection> {
        match frame.get_pixel(0, 0)[0] {
            0 => Vec::new(),
            axis => vec![detection_at(10.0, 10.0, basis(axis as usize % EMBEDDING_DIM))],
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn load_models(&self) -> Result<(), ModelLoadError> {
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn models_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        async fn detect_all(
            &self,
            frame: Arc<RgbImage>,
            _options: DetectOptions,
        ) -> Result<Vec<Detection>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.load(Ordering::SeqCst) {
                return Err(ExtractionError::Backend(anyhow::anyhow!("scripted failure")));
            }
            Ok(faces_in(&frame))
        }

        async fn detect_single_best(
            &self,
            image: Arc<RgbImage>,
        ) -> Result<Option<Detection>, ExtractionError> {
            if !self.models_loaded() {
                return Err(ExtractionError::ModelsNotLoaded);
            }
            Ok(faces_in(&image).into_iter().next())
        }
    }
}
