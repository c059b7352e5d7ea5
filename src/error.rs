//! Error taxonomy for the redaction core
//!
//! Engine internals use `anyhow`; everything that crosses into the session,
//! enrollment or gallery surface is one of these typed conditions so callers
//! can react to the specific failure.

use thiserror::Error;

/// The detector/embedder backend could not be made ready.
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("failed to load {model} model: {source}")]
    Backend {
        model: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// A frame source could not be opened. The session stays stopped.
#[derive(Error, Debug)]
pub enum SourceOpenError {
    #[error("invalid stream url '{0}'")]
    InvalidUrl(String),
    #[error("stream request failed: {0}")]
    Request(String),
    #[error("stream returned HTTP {0}")]
    Status(u16),
    #[error("could not decode first frame: {0}")]
    Decode(String),
    #[error("capture device '{0}' is not available")]
    DeviceUnavailable(String),
    #[error("capture device '{0}' produced no frames")]
    DeviceEmpty(String),
    #[error("timed out waiting for the first frame")]
    Timeout,
}

/// One detection pass failed. Transient: the detection loop swallows it.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("models are not loaded")]
    ModelsNotLoaded,
    #[error("embedding has {actual} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, actual: usize },
    #[error("extraction failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Enrollment of one still image (or a whole batch) failed.
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("no face detected in '{0}'")]
    NoFaceDetected(String),
    #[error("could not decode image '{name}': {reason}")]
    InvalidImage { name: String, reason: String },
    #[error("extraction failed for '{name}': {source}")]
    Extraction {
        name: String,
        #[source]
        source: ExtractionError,
    },
    #[error("no faces found in any of the {0} images")]
    NoFacesFound(usize),
}

/// A gallery import was rejected as a whole; the current gallery is untouched.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("import is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("import must be a JSON array of entries")]
    NotASequence,
    #[error("entry {index} is malformed: {reason}")]
    MalformedEntry { index: usize, reason: String },
    #[error("entry {index} reuses id '{id}'")]
    DuplicateId { index: usize, id: String },
}

/// Session start failures.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("face models are not loaded yet")]
    ModelsNotLoaded,
    #[error("a session is already {0}")]
    AlreadyActive(&'static str),
    #[error("no frame source configured")]
    NoSource,
    #[error("session start was cancelled by stop")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] SourceOpenError),
}
