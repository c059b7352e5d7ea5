//! Detection loop
//!
//! Self-paced background task: extract from the current frame and publish
//! the result once per poll interval. An extraction that overruns the
//! interval is followed immediately by the next one. At most one extraction
//! is ever outstanding, and a failed extraction only costs one iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{DetectOptions, Extractor};
use crate::source::FrameProvider;

use super::snapshot::SnapshotCell;
use super::{stop_requested, LoopHandle};

pub struct DetectionLoop {
    extractor: Arc<dyn Extractor>,
    provider: Arc<dyn FrameProvider>,
    cell: Arc<SnapshotCell>,
    options: DetectOptions,
    poll_interval: Duration,
    in_flight: AtomicBool,
}

impl DetectionLoop {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        provider: Arc<dyn FrameProvider>,
        cell: Arc<SnapshotCell>,
        options: DetectOptions,
        poll_interval: Duration,
    ) -> Self {
        Self {
            extractor,
            provider,
            cell,
            options,
            poll_interval,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn spawn(self) -> LoopHandle {
        LoopHandle::spawn(move |stop| self.run(stop))
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        info!("Detection loop started, polling every {:?}", self.poll_interval);
        let mut published = 0u64;
        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        // Overrun ticks fire at once, then the cadence restarts from there
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                _ = ticker.tick() => {}
            }

            if self.poll_once().await.is_some() {
                published += 1;
            }
        }

        info!("Detection loop stopped after {} snapshots", published);
    }

    /// One iteration. Returns the published sequence number, if any.
    pub async fn poll_once(&self) -> Option<u64> {
        if !self.provider.is_playing() || self.provider.has_ended() {
            return None;
        }
        let frame = self.provider.current_frame()?;

        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Extraction already in flight, skipping poll");
            return None;
        }
        let start = Instant::now();
        let result = self.extractor.detect_all(frame.image, self.options).await;
        self.in_flight.store(false, Ordering::Release);

        match result {
            Ok(detections) => {
                let count = detections.len();
                let sequence = self.cell.publish(detections, frame.captured_at);
                match sequence {
                    Some(seq) => debug!(
                        "Snapshot {} from frame {}: {} faces in {:?}",
                        seq,
                        frame.index,
                        count,
                        start.elapsed()
                    ),
                    None => debug!("Discarded result for frame {} after stop", frame.index),
                }
                sequence
            }
            Err(e) => {
                warn!("Extraction failed on frame {}: {}", frame.index, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::{frame_with_face, FakeExtractor};
    use crate::source::FrameSlot;

    fn setup(delay: Duration) -> (Arc<FakeExtractor>, Arc<FrameSlot>, Arc<SnapshotCell>) {
        let slot = Arc::new(FrameSlot::new());
        slot.store(frame_with_face(1));
        let cell = Arc::new(SnapshotCell::new());
        cell.open();
        (Arc::new(FakeExtractor::new(delay)), slot, cell)
    }

    fn detection_loop(
        extractor: &Arc<FakeExtractor>,
        slot: &Arc<FrameSlot>,
        cell: &Arc<SnapshotCell>,
    ) -> DetectionLoop {
        DetectionLoop::new(
            extractor.clone(),
            slot.clone(),
            cell.clone(),
            DetectOptions::default(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_poll_interval() {
        let (extractor, slot, cell) = setup(Duration::from_millis(50));
        let handle = detection_loop(&extractor, &slot, &cell).spawn();

        // Polls at 0, 200, 400, 600, 800
        tokio::time::sleep(Duration::from_millis(900)).await;
        handle.shutdown().await;

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 5);
        let latest = cell.latest();
        assert_eq!(latest.sequence, 5);
        assert_eq!(latest.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_extraction_never_overlaps() {
        // Extraction five times longer than the poll interval
        let (extractor, slot, cell) = setup(Duration::from_millis(1000));
        let handle = detection_loop(&extractor, &slot, &cell).spawn();

        // Each poll starts as soon as the previous one completes: 0, 1000, ..., 10000
        tokio::time::sleep(Duration::from_millis(10_050)).await;
        handle.shutdown().await;

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 11);
        assert_eq!(extractor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_snapshot_and_loop_alive() {
        let (extractor, slot, cell) = setup(Duration::ZERO);
        let handle = detection_loop(&extractor, &slot, &cell).spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cell.latest().sequence, 1);

        extractor.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(cell.latest().sequence, 1);
        assert_eq!(cell.latest().len(), 1);
        assert!(!handle.is_finished());

        extractor.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cell.latest().sequence > 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_in_flight_at_stop_is_discarded() {
        let (extractor, slot, cell) = setup(Duration::from_millis(500));
        let handle = detection_loop(&extractor, &slot, &cell).spawn();

        // First extraction is still running
        tokio::time::sleep(Duration::from_millis(100)).await;
        cell.close();
        handle.stop();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cell.latest().sequence, 0);
    }

    #[tokio::test]
    async fn test_skips_stalled_ended_and_empty_sources() {
        let (extractor, slot, cell) = setup(Duration::ZERO);
        let detection = detection_loop(&extractor, &slot, &cell);

        slot.set_stalled(true);
        assert_eq!(detection.poll_once().await, None);
        slot.set_stalled(false);
        assert_eq!(detection.poll_once().await, Some(1));
        slot.mark_ended();
        assert_eq!(detection.poll_once().await, None);

        let empty = Arc::new(FrameSlot::new());
        let detection = detection_loop(&extractor, &empty, &cell);
        assert_eq!(detection.poll_once().await, None);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_rejects_overlapping_poll() {
        let (extractor, slot, cell) = setup(Duration::from_millis(50));
        let detection = detection_loop(&extractor, &slot, &cell);

        let (a, b) = tokio::join!(detection.poll_once(), detection.poll_once());
        assert_eq!([a, b].iter().filter(|r| r.is_some()).count(), 1);
        assert_eq!(extractor.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
