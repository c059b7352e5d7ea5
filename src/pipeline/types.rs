//! Pipeline data model

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::error::ExtractionError;
use crate::utils::math::euclidean_distance;

/// Dimensionality of the embedding space the extractor produces.
pub const EMBEDDING_DIM: usize = 128;

/// Fixed-length face descriptor. Immutable once produced; clones share storage.
#[derive(Clone, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    /// Wrap a raw vector, checking its dimensionality
    pub fn new(values: Vec<f32>) -> Result<Self, ExtractionError> {
        if values.len() != EMBEDDING_DIM {
            return Err(ExtractionError::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        Ok(Self(values.into()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean (L2) distance to another embedding
    pub fn distance(&self, other: &Embedding) -> f32 {
        euclidean_distance(&self.0, &other.0)
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedding([{:.4}, {:.4}, ..; {}])", self.0[0], self.0[1], self.0.len())
    }
}

/// Axis-aligned box in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates, as detectors usually report them
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One located face plus its embedding, taken from a single frame
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub embedding: Embedding,
}

/// The most recently published set of detections.
#[derive(Debug, Clone)]
pub struct DetectionSnapshot {
    pub sequence: u64,
    pub captured_at: Instant,
    pub detections: Vec<Detection>,
}

impl DetectionSnapshot {
    /// The sequence-zero snapshot that exists before any extraction has run
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            captured_at: Instant::now(),
            detections: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Per-detection verdict, recomputed on every rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub bbox: BoundingBox,
    pub is_match: bool,
}

/// Continuously overwritten summary of the render loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub frames_per_second: f32,
    pub faces_detected: usize,
    pub faces_redacted: usize,
}
