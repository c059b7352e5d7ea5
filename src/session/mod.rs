//! Session controller
//!
//! Explicit `Stopped -> Starting -> Running` state machine. A running session
//! owns the frame provider, a fresh snapshot cell and both loops; stopping
//! tears all of them down in one call. Observers subscribe to state changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, PipelineConfig, RecognitionConfig, RenderConfig};
use crate::engine::Extractor;
use crate::error::SessionError;
use crate::pipeline::{
    DetectionLoop, FrameCompositor, IntervalClock, LoopHandle, Matcher, OutputSurface, RenderLoop,
    SnapshotCell,
};
use crate::pipeline::types::ProcessingStats;
use crate::source::{FrameProvider, FrameSource, SourceDescriptor};
use crate::storage::Gallery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMessage {
    Start,
    SourceReady,
    SourceFailed,
    Stop,
}

/// Next state for `message`; messages that don't apply leave the state unchanged
pub fn transition(state: SessionState, message: SessionMessage) -> SessionState {
    use SessionMessage::*;
    use SessionState::*;

    match (state, message) {
        (Stopped, Start) => Starting,
        (Starting, SourceReady) => Running,
        (Starting, SourceFailed) => Stopped,
        (Starting | Running, Stop) => Stopped,
        (current, _) => current,
    }
}

struct ActiveSession {
    descriptor: SourceDescriptor,
    provider: Arc<dyn FrameProvider>,
    cell: Arc<SnapshotCell>,
    detection: LoopHandle,
    render: LoopHandle,
}

pub struct SessionController {
    extractor: Arc<dyn Extractor>,
    source: Arc<dyn FrameSource>,
    gallery: Arc<Gallery>,
    surface: Arc<dyn OutputSurface>,
    recognition: RecognitionConfig,
    pipeline: PipelineConfig,
    render: RenderConfig,
    state: watch::Sender<SessionState>,
    stats: Arc<watch::Sender<ProcessingStats>>,
    active: Mutex<Option<ActiveSession>>,
    // Bumped by every accepted start and every stop
    epoch: AtomicU64,
}

impl SessionController {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        source: Arc<dyn FrameSource>,
        gallery: Arc<Gallery>,
        surface: Arc<dyn OutputSurface>,
        config: &Config,
    ) -> Self {
        Self {
            extractor,
            source,
            gallery,
            surface,
            recognition: config.recognition.clone(),
            pipeline: config.pipeline.clone(),
            render: config.render.clone(),
            state: watch::channel(SessionState::Stopped).0,
            stats: Arc::new(watch::channel(ProcessingStats::default()).0),
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// The single "processing" flag exposed to observers
    pub fn is_processing(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ProcessingStats {
        *self.stats.borrow()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<ProcessingStats> {
        self.stats.subscribe()
    }

    pub fn active_source(&self) -> Option<SourceDescriptor> {
        self.active.lock().as_ref().map(|s| s.descriptor.clone())
    }

    /// Start the configured source, if there is one
    pub async fn start_configured(&self) -> Result<(), SessionError> {
        let descriptor = self.pipeline.source.clone().ok_or(SessionError::NoSource)?;
        self.start(descriptor).await
    }

    /// Open `descriptor` and run both loops against it
    pub async fn start(&self, descriptor: SourceDescriptor) -> Result<(), SessionError> {
        if !self.extractor.models_loaded() {
            return Err(SessionError::ModelsNotLoaded);
        }
        let epoch = {
            let _active = self.active.lock();
            let previous = self.dispatch(SessionMessage::Start);
            if previous != SessionState::Stopped {
                return Err(SessionError::AlreadyActive(previous.as_str()));
            }
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        let opened = self.source.open(&descriptor).await;

        let mut active = self.active.lock();
        // A stop, or a stop followed by a newer start, ran while the source was opening
        let superseded =
            self.state() != SessionState::Starting || self.epoch.load(Ordering::SeqCst) != epoch;
        let provider = match opened {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Failed to open {}: {}", descriptor, e);
                if !superseded {
                    self.dispatch(SessionMessage::SourceFailed);
                }
                return Err(e.into());
            }
        };
        if superseded {
            provider.close();
            return Err(SessionError::Cancelled);
        }

        let cell = Arc::new(SnapshotCell::new());
        cell.open();

        let detection = DetectionLoop::new(
            self.extractor.clone(),
            provider.clone(),
            cell.clone(),
            self.recognition.detect_options(),
            self.pipeline.poll_interval(),
        )
        .spawn();
        let render = RenderLoop::new(
            provider.clone(),
            cell.clone(),
            self.gallery.clone(),
            Matcher::new(self.recognition.match_threshold),
            FrameCompositor::new(&self.render),
            self.surface.clone(),
            self.stats.clone(),
        )
        .spawn(IntervalClock::new(self.pipeline.refresh_period()));

        info!("Session running on {}", descriptor);
        *active = Some(ActiveSession {
            descriptor,
            provider,
            cell,
            detection,
            render,
        });
        self.dispatch(SessionMessage::SourceReady);
        Ok(())
    }

    /// Stop both loops and release the source. Returns whether a session was active.
    ///
    /// The source is closed before this returns; an extraction still in
    /// flight finishes in the background and its result is dropped.
    pub async fn stop(&self) -> bool {
        let session = {
            let mut active = self.active.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.dispatch(SessionMessage::Stop);
            active.take()
        };
        let Some(session) = session else {
            return false;
        };

        session.cell.close();
        session.detection.stop();
        session.provider.close();
        session.render.shutdown().await;

        self.surface.clear();
        self.stats.send_replace(ProcessingStats::default());
        info!("Session on {} stopped", session.descriptor);
        true
    }

    /// Apply a message and return the state it was applied to
    fn dispatch(&self, message: SessionMessage) -> SessionState {
        let mut previous = SessionState::Stopped;
        self.state.send_if_modified(|state| {
            previous = *state;
            let next = transition(*state, message);
            if next == *state {
                return false;
            }
            debug!("Session {} -> {} on {:?}", state.as_str(), next.as_str(), message);
            *state = next;
            true
        });
        previous
    }
}
