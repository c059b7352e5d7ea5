//! Pull-addressable network stream
//!
//! Polls a snapshot URL (the `snapshot.jpg` style endpoint most IP cameras
//! expose) and keeps the latest decoded frame.

use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use crate::error::SourceOpenError;

use super::{FrameProvider, FrameSlot};

/// HTTP snapshot source
pub struct HttpSnapshotSource {
    client: Client,
    poll_interval: Duration,
    open_timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(poll_interval: Duration, open_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(open_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self {
            client,
            poll_interval,
            open_timeout,
        }
    }

    /// Fetch the first frame, then keep polling in the background
    pub async fn open_url(&self, url: &str) -> Result<Arc<dyn FrameProvider>, SourceOpenError> {
        let parsed = Url::parse(url).map_err(|_| SourceOpenError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceOpenError::InvalidUrl(url.to_string()));
        }

        let first = tokio::time::timeout(self.open_timeout, fetch_frame(&self.client, &parsed))
            .await
            .map_err(|_| SourceOpenError::Timeout)??;
        info!("Stream {} ready at {}x{}", parsed, first.width(), first.height());

        let slot = Arc::new(FrameSlot::new());
        slot.store(first);

        let weak = Arc::downgrade(&slot);
        let client = self.client.clone();
        let poll_interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                let result = fetch_frame(&client, &parsed).await;
                let Some(slot) = weak.upgrade() else {
                    break;
                };
                match result {
                    Ok(frame) => slot.store(frame),
                    Err(e) => {
                        debug!("Stream fetch failed: {}", e);
                        slot.set_stalled(true);
                    }
                }
            }
        });
        slot.attach_feeder(handle);

        Ok(slot)
    }
}

async fn fetch_frame(client: &Client, url: &Url) -> Result<RgbImage, SourceOpenError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| SourceOpenError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceOpenError::Status(status.as_u16()));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SourceOpenError::Request(e.to_string()))?;

    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| SourceOpenError::Decode(e.to_string()))?
        .map_err(|e| SourceOpenError::Decode(e.to_string()))
}
