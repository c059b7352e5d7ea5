//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use image::DynamicImage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::engine::Extractor;
use crate::error::{EnrollmentError, SessionError};
use crate::pipeline::SharedSurface;
use crate::service::{EnrollmentImage, GalleryService};
use crate::session::SessionController;
use crate::source::SourceDescriptor;
use crate::utils::image::encode_jpeg;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: &str, code: &str) -> ApiError {
    (status, Json(ErrorResponse::new(message, code)))
}

/// Application state shared across handlers
pub struct AppState {
    pub session: Arc<SessionController>,
    pub gallery: Arc<GalleryService>,
    pub extractor: Arc<dyn Extractor>,
    pub surface: Arc<SharedSurface>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Session control
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/session/start", post(start_handler))
        .route("/api/v1/session/stop", post(stop_handler))
        .route("/api/v1/frame", get(frame_handler))
        // Gallery
        .route("/api/v1/gallery", get(list_gallery_handler))
        .route("/api/v1/gallery/enroll", post(enroll_handler))
        .route("/api/v1/gallery/export", get(export_handler))
        .route("/api/v1/gallery/import", post(import_handler))
        .route("/api/v1/gallery/:id", delete(delete_handler))
        // System endpoints
        .route("/health", get(health_handler))
        // Middleware
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB limit for enrollment batches
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        models_loaded: state.extractor.models_loaded(),
    })
}

/// Session state, stats and gallery size
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let session = &state.session;
    Json(StatusResponse {
        state: session.state(),
        processing: session.is_processing(),
        stats: session.stats(),
        source: session.active_source(),
        gallery_size: state.gallery.gallery().len(),
        models_loaded: state.extractor.models_loaded(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

fn session_response(session: &SessionController) -> Json<SessionResponse> {
    Json(SessionResponse {
        state: session.state(),
        processing: session.is_processing(),
    })
}

/// Start a session. An empty body starts the configured source.
async fn start_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionResponse>, ApiError> {
    let result = if body.iter().all(u8::is_ascii_whitespace) {
        state.session.start_configured().await
    } else {
        let descriptor: SourceDescriptor = serde_json::from_slice(&body).map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, &e.to_string(), "INVALID_SOURCE")
        })?;
        state.session.start(descriptor).await
    };

    result.map_err(|e| {
        let (status, code) = match &e {
            SessionError::ModelsNotLoaded => (StatusCode::SERVICE_UNAVAILABLE, "MODELS_NOT_LOADED"),
            SessionError::AlreadyActive(_) => (StatusCode::CONFLICT, "SESSION_ACTIVE"),
            SessionError::Cancelled => (StatusCode::CONFLICT, "SESSION_CANCELLED"),
            SessionError::NoSource => (StatusCode::BAD_REQUEST, "NO_SOURCE"),
            SessionError::Source(_) => (StatusCode::BAD_GATEWAY, "SOURCE_OPEN_FAILED"),
        };
        warn!("Session start failed: {}", e);
        api_error(status, &e.to_string(), code)
    })?;

    Ok(session_response(&state.session))
}

/// Stop the running session, if any
async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    state.session.stop().await;
    session_response(&state.session)
}

/// Latest composited frame as JPEG
async fn frame_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let frame = state
        .surface
        .latest()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "No frame rendered yet", "NO_FRAME"))?;

    let jpeg = tokio::task::spawn_blocking(move || {
        encode_jpeg(&DynamicImage::ImageRgb8(frame.as_ref().clone()), 80)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|r| r)
    .map_err(|e| {
        error!("Frame encoding failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "ENCODE_FAILED")
    })?;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

/// List gallery entries
async fn list_gallery_handler(State(state): State<Arc<AppState>>) -> Json<ListGalleryResponse> {
    let entries: Vec<GalleryEntryDto> = state.gallery.list().iter().map(GalleryEntryDto::from).collect();
    Json(ListGalleryResponse {
        total: entries.len(),
        entries,
    })
}

/// Enroll one or more images. `name` fields pair with `image` fields by order.
async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<EnrollResponse>, ApiError> {
    let mut images: Vec<(Option<String>, Vec<u8>)> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, &e.to_string(), "MULTIPART_ERROR")
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, &e.to_string(), "READ_ERROR")
                })?;
                images.push((file_name, data.to_vec()));
            }
            "name" => names.push(field.text().await.unwrap_or_default()),
            _ => {}
        }
    }

    if images.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing image field", "MISSING_IMAGE"));
    }

    let batch = images
        .into_iter()
        .enumerate()
        .map(|(i, (file_name, data))| {
            let name = names
                .get(i)
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .or(file_name)
                .unwrap_or_else(|| format!("image-{}", i + 1));
            EnrollmentImage { name, data }
        })
        .collect();

    let outcome = state.gallery.enroll_batch(batch).await.map_err(|e| match e {
        EnrollmentError::NoFacesFound(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string(), "NO_FACES_FOUND")
        }
        other => {
            error!("Enrollment failed: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string(), "ENROLLMENT_FAILED")
        }
    })?;

    Ok(Json(EnrollResponse {
        enrolled: outcome.enrolled.iter().map(GalleryEntryDto::from).collect(),
        failed: outcome.failed.iter().map(|e| e.to_string()).collect(),
    }))
}

/// Delete a gallery entry
async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if state.gallery.remove(&id).await {
        Ok(Json(DeleteResponse {
            success: true,
            message: "Entry deleted successfully".to_string(),
        }))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "Entry not found", "NOT_FOUND"))
    }
}

/// Download the whole gallery in the interchange format
async fn export_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let document = state.gallery.export().map_err(|e| {
        error!("Gallery export failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "EXPORT_FAILED")
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"gallery.json\""),
        ],
        document,
    )
        .into_response())
}

/// Replace the gallery with an uploaded document
async fn import_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ImportResponse>, ApiError> {
    let imported = state.gallery.import(&body).await.map_err(|e| {
        warn!("Gallery import rejected: {}", e);
        api_error(StatusCode::BAD_REQUEST, &e.to_string(), "IMPORT_MALFORMED")
    })?;
    Ok(Json(ImportResponse { imported }))
}
