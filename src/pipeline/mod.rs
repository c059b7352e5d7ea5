//! Real-time redaction pipeline
//!
//! Two independently scheduled tasks share one `SnapshotCell`: the
//! detection loop is its only writer, the render loop its only reader.

pub mod types;
pub mod matcher;
pub mod snapshot;
pub mod detection;
pub mod render;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use detection::DetectionLoop;
pub use matcher::Matcher;
pub use render::{DisplayClock, FrameCompositor, IntervalClock, OutputSurface, RenderLoop, SharedSurface};
pub use snapshot::SnapshotCell;

/// Stop signal plus join handle for a spawned loop
pub struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            task: tokio::spawn(run(stop_rx)),
        }
    }

    /// Signal the loop; it exits before its next iteration
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal and wait for the loop to exit
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Wait until the stop flag is raised or its sender is gone
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
