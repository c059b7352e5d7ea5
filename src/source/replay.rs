//! Local capture device backed by a directory of frames
//!
//! The device token is a directory path. Frames are decoded in file-name
//! order and played once at a fixed rate, which stands in for a camera
//! without tying the core to a platform capture API. The stream reports
//! ended after its last frame.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use tracing::{info, warn};

use crate::error::SourceOpenError;

use super::{FrameProvider, FrameSlot};

pub struct ReplayDevice {
    frame_interval: Duration,
}

impl ReplayDevice {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval: frame_interval.max(Duration::from_millis(1)),
        }
    }

    pub async fn open_device(&self, token: &str) -> Result<Arc<dyn FrameProvider>, SourceOpenError> {
        let frames = list_frames(Path::new(token))
            .ok_or_else(|| SourceOpenError::DeviceUnavailable(token.to_string()))?;
        if frames.is_empty() {
            return Err(SourceOpenError::DeviceEmpty(token.to_string()));
        }

        let first = load_frame(frames[0].clone())
            .await
            .map_err(SourceOpenError::Decode)?;
        info!(
            "Capture device {} ready: {} frames at {}x{}",
            token,
            frames.len(),
            first.width(),
            first.height()
        );

        let slot = Arc::new(FrameSlot::new());
        slot.store(first);

        let weak = Arc::downgrade(&slot);
        let frame_interval = self.frame_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.tick().await;
            for path in frames.iter().skip(1) {
                ticker.tick().await;
                let result = load_frame(path.clone()).await;
                let Some(slot) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(frame) => slot.store(frame),
                    Err(e) => warn!("Skipping unreadable frame {}: {}", path.display(), e),
                }
            }
            if let Some(slot) = weak.upgrade() {
                info!("Capture replay finished after {} frames", frames.len());
                slot.mark_ended();
            }
        });
        slot.attach_feeder(handle);

        Ok(slot)
    }
}

fn list_frames(dir: &Path) -> Option<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut frames: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
        .collect();
    frames.sort();
    Some(frames)
}

async fn load_frame(path: PathBuf) -> Result<RgbImage, String> {
    tokio::task::spawn_blocking(move || {
        image::open(&path)
            .map(|img| img.to_rgb8())
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn device() -> ReplayDevice {
        ReplayDevice::new(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let err = device().open_device("/definitely/not/here").await.err().unwrap();
        assert!(matches!(err, SourceOpenError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_directory_without_images_is_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let err = device()
            .open_device(dir.path().to_str().unwrap())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceOpenError::DeviceEmpty(_)));
    }

    #[tokio::test]
    async fn test_plays_frames_then_reports_ended() {
        let dir = tempdir().unwrap();
        for i in 0..3 {
            RgbImage::new(16, 9)
                .save(dir.path().join(format!("frame_{i:03}.png")))
                .unwrap();
        }

        let provider = device().open_device(dir.path().to_str().unwrap()).await.unwrap();
        let first = provider.current_frame().unwrap();
        assert_eq!(first.dimensions(), (16, 9));

        assert!(provider.is_playing());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let last = provider.current_frame().unwrap();
        assert_eq!(last.index, 2);
        assert!(provider.has_ended());
        assert!(!provider.is_playing());

        provider.close();
        assert!(!provider.is_playing());
        assert!(provider.current_frame().is_none());
    }
}
