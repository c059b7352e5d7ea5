//! Frame sources
//!
//! Video acquisition sits behind two small traits: a `FrameSource` opens a
//! descriptor and hands back a `FrameProvider`, which the detection and
//! render loops poll for the current frame. Both concrete sources keep the
//! latest decoded frame in a `FrameSlot` fed by a background task.

pub mod http;
pub mod replay;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::SourceOpenError;

pub use http::HttpSnapshotSource;
pub use replay::ReplayDevice;

/// What to open: a pull-addressable network stream or a local capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDescriptor {
    Url(String),
    Device(String),
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceDescriptor::Url(url) => write!(f, "url:{}", url),
            SourceDescriptor::Device(token) => write!(f, "device:{}", token),
        }
    }
}

/// One decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub index: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Opaque "current frame provider" the pipeline reads from
pub trait FrameProvider: Send + Sync {
    /// Most recent frame, `None` until the source has produced one
    fn current_frame(&self) -> Option<Frame>;

    /// Frames are flowing: not stalled, ended or closed
    fn is_playing(&self) -> bool;

    /// The source will produce no further frames
    fn has_ended(&self) -> bool;

    /// Release the underlying device or connection. Idempotent.
    fn close(&self);
}

/// Opens frame providers from descriptors
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    async fn open(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<Arc<dyn FrameProvider>, SourceOpenError>;
}

/// Dispatches URLs to the HTTP source and device tokens to the replay device
pub struct StandardFrameSource {
    http: HttpSnapshotSource,
    device: ReplayDevice,
}

impl StandardFrameSource {
    pub fn new(http: HttpSnapshotSource, device: ReplayDevice) -> Self {
        Self { http, device }
    }
}

#[async_trait]
impl FrameSource for StandardFrameSource {
    async fn open(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<Arc<dyn FrameProvider>, SourceOpenError> {
        info!("Opening frame source {}", descriptor);
        match descriptor {
            SourceDescriptor::Url(url) => self.http.open_url(url).await,
            SourceDescriptor::Device(token) => self.device.open_device(token).await,
        }
    }
}

/// Latest-frame slot plus playback flags shared by a provider and its feeder task
pub struct FrameSlot {
    frame: RwLock<Option<Frame>>,
    next_index: AtomicU64,
    stalled: AtomicBool,
    ended: AtomicBool,
    closed: AtomicBool,
    feeder: Mutex<Option<JoinHandle<()>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            frame: RwLock::new(None),
            next_index: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            feeder: Mutex::new(None),
        }
    }

    /// Store a freshly decoded frame and clear the stalled flag
    pub fn store(&self, image: RgbImage) {
        let mut frame = self.frame.write();
        // Checked under the frame lock so a racing close() always wins
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        *frame = Some(Frame {
            image: Arc::new(image),
            index,
            captured_at: Instant::now(),
        });
        self.stalled.store(false, Ordering::Release);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
    }

    /// Attach the background task that feeds this slot; aborted on close
    pub fn attach_feeder(&self, handle: JoinHandle<()>) {
        let mut feeder = self.feeder.lock();
        if self.closed.load(Ordering::Acquire) {
            handle.abort();
        } else {
            *feeder = Some(handle);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProvider for FrameSlot {
    fn current_frame(&self) -> Option<Frame> {
        self.frame.read().clone()
    }

    fn is_playing(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && !self.stalled.load(Ordering::Acquire)
            && !self.ended.load(Ordering::Acquire)
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        let mut feeder = self.feeder.lock();
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = feeder.take() {
            handle.abort();
        }
        *self.frame.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serde_shape() {
        let url: SourceDescriptor = serde_json::from_str(r#"{"url":"http://cam/snap.jpg"}"#).unwrap();
        assert_eq!(url, SourceDescriptor::Url("http://cam/snap.jpg".to_string()));

        #[derive(Deserialize)]
        struct Section {
            source: SourceDescriptor,
        }
        let section: Section = toml::from_str("source = { device = \"frames/\" }").unwrap();
        assert_eq!(section.source, SourceDescriptor::Device("frames/".to_string()));
    }

    #[test]
    fn test_slot_playback_flags() {
        let slot = FrameSlot::new();
        assert!(slot.current_frame().is_none());
        assert!(slot.is_playing());

        slot.store(RgbImage::new(4, 3));
        slot.store(RgbImage::new(4, 3));
        let frame = slot.current_frame().unwrap();
        assert_eq!(frame.index, 1);
        assert_eq!(frame.dimensions(), (4, 3));

        slot.set_stalled(true);
        assert!(!slot.is_playing());
        slot.store(RgbImage::new(4, 3));
        assert!(slot.is_playing());

        slot.mark_ended();
        assert!(!slot.is_playing());
        assert!(slot.has_ended());
        assert!(slot.current_frame().is_some());
    }

    #[test]
    fn test_store_after_close_is_dropped_even_when_racing() {
        let slot = Arc::new(FrameSlot::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        slot.store(RgbImage::new(2, 2));
                    }
                })
            })
            .collect();
        slot.close();
        for writer in writers {
            writer.join().unwrap();
        }
        assert!(slot.current_frame().is_none());
    }

    #[tokio::test]
    async fn test_close_aborts_feeder_and_drops_frame() {
        let slot = FrameSlot::new();
        slot.store(RgbImage::new(2, 2));
        let handle = tokio::spawn(std::future::pending::<()>());
        slot.attach_feeder(handle);

        slot.close();
        assert!(slot.is_closed());
        assert!(slot.has_ended());
        assert!(!slot.is_playing());
        assert!(slot.current_frame().is_none());

        // Late frames from a racing feeder are ignored
        slot.store(RgbImage::new(2, 2));
        assert!(slot.current_frame().is_none());
    }
}
