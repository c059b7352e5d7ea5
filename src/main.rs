//! Face Redaction Service
//!
//! Blurs enrolled faces in a live video feed, with an Axum REST control
//! surface and OpenVINO inference.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use faceveil::api::{create_rest_router, AppState};
use faceveil::config::Config;
use faceveil::engine::{Extractor, OpenVinoExtractor};
use faceveil::pipeline::SharedSurface;
use faceveil::service::GalleryService;
use faceveil::session::SessionController;
use faceveil::source::{HttpSnapshotSource, ReplayDevice, StandardFrameSource};
use faceveil::storage::{Gallery, GalleryStore, JsonFileStore, MemoryStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Starting Face Redaction Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });

    info!("Configuration loaded:");
    info!("  REST port: {}", config.server.rest_port);
    info!("  Device: {}", config.inference.device);
    info!("  Match threshold: {}", config.recognition.match_threshold);
    info!("  Poll interval: {:?}", config.pipeline.poll_interval());

    // Initialize extractor
    let extractor: Arc<dyn Extractor> = Arc::new(OpenVinoExtractor::new(
        &config.inference,
        &config.models,
        config.recognition.enrollment_options(),
    ));

    // Initialize gallery and its store
    let store: Arc<dyn GalleryStore> = match &config.gallery.path {
        Some(path) => {
            info!("Gallery persisted at: {}", path.display());
            Arc::new(JsonFileStore::new(path))
        }
        None => Arc::new(MemoryStore::new()),
    };
    let gallery = Arc::new(Gallery::new());
    let gallery_service = Arc::new(GalleryService::new(
        gallery.clone(),
        extractor.clone(),
        store,
        config.gallery.thumbnail_size,
    ));
    info!("Restored {} gallery entries", gallery_service.restore().await);

    // Session controller
    let source = StandardFrameSource::new(
        HttpSnapshotSource::new(
            Duration::from_millis(config.pipeline.stream_poll_ms),
            Duration::from_millis(config.pipeline.open_timeout_ms),
        ),
        ReplayDevice::new(Duration::from_millis(config.pipeline.stream_poll_ms)),
    );
    let surface = Arc::new(SharedSurface::new());
    let session = Arc::new(SessionController::new(
        extractor.clone(),
        Arc::new(source),
        gallery,
        surface.clone(),
        &config,
    ));

    // Start REST server
    let app_state = Arc::new(AppState {
        session: session.clone(),
        gallery: gallery_service,
        extractor: extractor.clone(),
        surface,
        start_time: Instant::now(),
    });
    let rest_router = create_rest_router(app_state);

    let addr = format!("0.0.0.0:{}", config.server.rest_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("REST API listening on http://{}", addr);
    let _rest_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, rest_router).await {
            error!("REST server failed: {}", e);
        }
    });

    // Load models in the background; the API answers meanwhile
    let loader = {
        let extractor = extractor.clone();
        let session = session.clone();
        let auto_start = config.pipeline.auto_start;
        tokio::spawn(async move {
            let start = Instant::now();
            if let Err(e) = extractor.load_models().await {
                error!("Model loading failed: {}", e);
                return;
            }
            info!("Models loaded in {:?}", start.elapsed());

            if auto_start {
                match session.start_configured().await {
                    Ok(()) => info!("Auto-started configured source"),
                    Err(e) => warn!("Auto-start failed: {}", e),
                }
            }
        })
    };

    info!("Face Redaction Service is ready!");
    info!("REST: http://localhost:{}/health", config.server.rest_port);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    loader.abort();
    session.stop().await;

    info!("Goodbye!");
    Ok(())
}
