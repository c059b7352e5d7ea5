//! Latest-snapshot handoff between the detection and render loops
//!
//! A `watch` channel is a capacity-one overwrite channel: publishing replaces
//! the previous value whether or not the reader saw it, and the reader only
//! ever clones an `Arc`, so it never observes a half-built snapshot and the
//! writer never waits on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::types::{Detection, DetectionSnapshot};

/// Shared cell holding the current `DetectionSnapshot`
pub struct SnapshotCell {
    tx: watch::Sender<Arc<DetectionSnapshot>>,
    sequence: AtomicU64,
    // Open while a session accepts results; stop closes it under the lock
    gate: Mutex<bool>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(DetectionSnapshot::empty()));
        Self {
            tx,
            sequence: AtomicU64::new(0),
            gate: Mutex::new(false),
        }
    }

    /// Clear stale detections and accept publications again
    pub fn open(&self) {
        let mut open = self.gate.lock();
        self.tx.send_replace(Arc::new(DetectionSnapshot::empty()));
        *open = true;
    }

    /// Refuse further publications. Once this returns no in-flight result can land.
    pub fn close(&self) {
        *self.gate.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.gate.lock()
    }

    /// Publish a new snapshot with the next sequence number.
    ///
    /// Returns `None` when the cell is closed and the detections were dropped.
    pub fn publish(&self, detections: Vec<Detection>, captured_at: Instant) -> Option<u64> {
        let open = self.gate.lock();
        if !*open {
            return None;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(Arc::new(DetectionSnapshot {
            sequence,
            captured_at,
            detections,
        }));
        Some(sequence)
    }

    /// Current snapshot
    pub fn latest(&self) -> Arc<DetectionSnapshot> {
        self.tx.borrow().clone()
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::fixtures::{basis, detection_at};

    #[test]
    fn test_publish_replaces_previous() {
        let cell = SnapshotCell::new();
        cell.open();

        let first = cell.publish(vec![detection_at(0.0, 0.0, basis(0))], Instant::now());
        let second = cell.publish(Vec::new(), Instant::now());
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));

        let latest = cell.latest();
        assert_eq!(latest.sequence, 2);
        assert!(latest.is_empty());
    }

    #[test]
    fn test_closed_cell_drops_publications() {
        let cell = SnapshotCell::new();
        assert!(!cell.is_open());
        assert_eq!(cell.publish(vec![detection_at(0.0, 0.0, basis(0))], Instant::now()), None);
        assert_eq!(cell.latest().sequence, 0);

        cell.open();
        cell.publish(Vec::new(), Instant::now());
        cell.close();
        assert_eq!(cell.publish(Vec::new(), Instant::now()), None);
        assert_eq!(cell.latest().sequence, 1);
    }

    #[test]
    fn test_reopen_clears_stale_detections_but_keeps_sequence_monotonic() {
        let cell = SnapshotCell::new();
        cell.open();
        cell.publish(vec![detection_at(0.0, 0.0, basis(0))], Instant::now());
        cell.close();

        cell.open();
        assert!(cell.latest().is_empty());
        assert_eq!(cell.publish(Vec::new(), Instant::now()), Some(2));
    }

    #[test]
    fn test_reader_holds_old_snapshot_while_writer_moves_on() {
        let cell = SnapshotCell::new();
        cell.open();
        cell.publish(vec![detection_at(1.0, 1.0, basis(0))], Instant::now());
        let held = cell.latest();

        cell.publish(Vec::new(), Instant::now());
        assert_eq!(held.len(), 1);
        assert_eq!(cell.latest().len(), 0);
    }
}
