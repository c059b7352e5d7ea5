//! REST API request/response data transfer objects

use serde::Serialize;

use crate::pipeline::types::ProcessingStats;
use crate::session::SessionState;
use crate::source::SourceDescriptor;
use crate::storage::GalleryEntry;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: bool,
}

/// Pipeline status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub processing: bool,
    pub stats: ProcessingStats,
    pub source: Option<SourceDescriptor>,
    pub gallery_size: usize,
    pub models_loaded: bool,
    pub uptime_seconds: u64,
}

/// Session start/stop response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: SessionState,
    pub processing: bool,
}

/// Gallery entry without its descriptor
#[derive(Debug, Serialize)]
pub struct GalleryEntryDto {
    pub id: String,
    pub name: String,
    pub thumbnail: String,
}

impl From<&GalleryEntry> for GalleryEntryDto {
    fn from(entry: &GalleryEntry) -> Self {
        Self {
            id: entry.id.clone(),
            name: entry.name.clone(),
            thumbnail: entry.thumbnail.to_data_uri(),
        }
    }
}

/// List gallery response
#[derive(Debug, Serialize)]
pub struct ListGalleryResponse {
    pub entries: Vec<GalleryEntryDto>,
    pub total: usize,
}

/// Batch enrollment response
#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub enrolled: Vec<GalleryEntryDto>,
    pub failed: Vec<String>,
}

/// Import response
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

/// Delete response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}
