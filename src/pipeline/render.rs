//! Render loop
//!
//! Once per display tick: copy the raw frame, match the latest snapshot
//! against the current gallery, draw the overlays, present, update stats.
//! Nothing here waits on the detection loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::RenderConfig;
use crate::source::FrameProvider;
use crate::storage::Gallery;

use super::matcher::Matcher;
use super::snapshot::SnapshotCell;
use super::types::{BoundingBox, MatchResult, ProcessingStats};
use super::{stop_requested, LoopHandle};

const FPS_WINDOW: Duration = Duration::from_secs(1);
const PERF_LOG_EVERY: u64 = 300;

/// Draws redaction overlays onto a frame
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    match_color: Rgb<u8>,
    no_match_color: Rgb<u8>,
    fill_alpha: f32,
    outline_width: u32,
}

impl FrameCompositor {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            match_color: Rgb(config.match_color),
            no_match_color: Rgb(config.no_match_color),
            fill_alpha: config.fill_alpha.clamp(0.0, 1.0),
            outline_width: config.outline_width.max(1),
        }
    }

    /// Matched boxes get a fill plus outline, the rest an outline only.
    /// Boxes entirely off the canvas are skipped.
    pub fn draw(&self, canvas: &mut RgbImage, results: &[MatchResult]) {
        for result in results {
            let Some(area) = PixelRect::clip(&result.bbox, canvas.width(), canvas.height()) else {
                continue;
            };
            if result.is_match {
                self.fill(canvas, &area, self.match_color);
                self.outline(canvas, &area, self.match_color);
            } else {
                self.outline(canvas, &area, self.no_match_color);
            }
        }
    }

    fn fill(&self, canvas: &mut RgbImage, area: &PixelRect, color: Rgb<u8>) {
        let a = self.fill_alpha;
        for y in area.y..area.y + area.height {
            for x in area.x..area.x + area.width {
                let pixel = canvas.get_pixel_mut(x, y);
                for c in 0..3 {
                    let blended = f32::from(pixel[c]) * (1.0 - a) + f32::from(color[c]) * a;
                    pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    fn outline(&self, canvas: &mut RgbImage, area: &PixelRect, color: Rgb<u8>) {
        for inset in 0..self.outline_width {
            let Some(width) = area.width.checked_sub(inset * 2).filter(|w| *w > 0) else {
                break;
            };
            let Some(height) = area.height.checked_sub(inset * 2).filter(|h| *h > 0) else {
                break;
            };
            let rect = Rect::at((area.x + inset) as i32, (area.y + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }
}

/// Bounding box clipped to whole canvas pixels
struct PixelRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl PixelRect {
    fn clip(bbox: &BoundingBox, canvas_w: u32, canvas_h: u32) -> Option<Self> {
        let x0 = bbox.x.max(0.0).floor() as u32;
        let y0 = bbox.y.max(0.0).floor() as u32;
        let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(canvas_w);
        let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(canvas_h);
        (x1 > x0 && y1 > y0).then(|| Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Where composited frames go
pub trait OutputSurface: Send + Sync {
    /// Size the surface to the source's native pixel dimensions
    fn configure(&self, width: u32, height: u32);

    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Show a composited frame
    fn present(&self, frame: RgbImage);

    /// Drop any visible frame
    fn clear(&self);
}

/// Output surface that keeps the latest composited frame for readers
#[derive(Default)]
pub struct SharedSurface {
    size: RwLock<Option<(u32, u32)>>,
    frame: RwLock<Option<Arc<RgbImage>>>,
}

impl SharedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        self.frame.read().clone()
    }
}

impl OutputSurface for SharedSurface {
    fn configure(&self, width: u32, height: u32) {
        *self.size.write() = Some((width, height));
        *self.frame.write() = None;
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        *self.size.read()
    }

    fn present(&self, frame: RgbImage) {
        *self.frame.write() = Some(Arc::new(frame));
    }

    fn clear(&self) {
        *self.size.write() = None;
        *self.frame.write() = None;
    }
}

/// Source of display refresh ticks
#[async_trait]
pub trait DisplayClock: Send + 'static {
    /// Wait for the next refresh and return its timestamp
    async fn tick(&mut self) -> Instant;
}

/// Fixed-rate refresh clock. Late ticks are skipped, never bunched.
pub struct IntervalClock {
    interval: tokio::time::Interval,
}

impl IntervalClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl DisplayClock for IntervalClock {
    async fn tick(&mut self) -> Instant {
        self.interval.tick().await.into_std()
    }
}

pub struct RenderLoop {
    provider: Arc<dyn FrameProvider>,
    cell: Arc<SnapshotCell>,
    gallery: Arc<Gallery>,
    matcher: Matcher,
    compositor: FrameCompositor,
    surface: Arc<dyn OutputSurface>,
    stats: Arc<watch::Sender<ProcessingStats>>,
    ticks: VecDeque<Instant>,
    rendered: u64,
}

impl RenderLoop {
    pub fn new(
        provider: Arc<dyn FrameProvider>,
        cell: Arc<SnapshotCell>,
        gallery: Arc<Gallery>,
        matcher: Matcher,
        compositor: FrameCompositor,
        surface: Arc<dyn OutputSurface>,
        stats: Arc<watch::Sender<ProcessingStats>>,
    ) -> Self {
        Self {
            provider,
            cell,
            gallery,
            matcher,
            compositor,
            surface,
            stats,
            ticks: VecDeque::new(),
            rendered: 0,
        }
    }

    pub fn spawn<C: DisplayClock>(self, clock: C) -> LoopHandle {
        LoopHandle::spawn(move |stop| self.run(clock, stop))
    }

    async fn run<C: DisplayClock>(mut self, mut clock: C, mut stop: watch::Receiver<bool>) {
        info!("Render loop started");
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                now = clock.tick() => {
                    self.tick(now);
                }
            }
        }
        info!("Render loop stopped after {} frames", self.rendered);
    }

    /// Render one display refresh. `None` until the source has a frame.
    pub fn tick(&mut self, now: Instant) -> Option<ProcessingStats> {
        let frame = self.provider.current_frame()?;
        let (width, height) = frame.dimensions();
        if self.surface.dimensions() != Some((width, height)) {
            info!("Output surface sized to {}x{}", width, height);
            self.surface.configure(width, height);
        }

        let mut canvas = frame.image.as_ref().clone();
        let snapshot = self.cell.latest();
        let gallery = self.gallery.snapshot();
        let results = self.matcher.match_snapshot(&snapshot, &gallery);
        self.compositor.draw(&mut canvas, &results);
        self.surface.present(canvas);

        let redacted = results.iter().filter(|r| r.is_match).count();

        let stats = ProcessingStats {
            frames_per_second: self.record_tick(now),
            faces_detected: snapshot.len(),
            faces_redacted: redacted,
        };
        self.stats.send_replace(stats);

        self.rendered += 1;
        if self.rendered % PERF_LOG_EVERY == 0 {
            debug!(
                "Rendered {} frames, {:.1} fps, snapshot {} ({} faces, {} redacted)",
                self.rendered, stats.frames_per_second, snapshot.sequence, stats.faces_detected, redacted
            );
        }
        Some(stats)
    }

    /// Rendered ticks within the last second
    fn record_tick(&mut self, now: Instant) -> f32 {
        self.ticks.push_back(now);
        while let Some(&oldest) = self.ticks.front() {
            if now.duration_since(oldest) >= FPS_WINDOW {
                self.ticks.pop_front();
            } else {
                break;
            }
        }
        self.ticks.len() as f32
    }
}
