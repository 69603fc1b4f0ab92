//! Live acquisition engine.
//!
//! One background tokio task per session snaps frames from a
//! [`FrameSource`], tags every channel with [`FrameMetadata`] and pushes it
//! into the host's [`FrameSink`].
//!
//! ```text
//! Idle --start()--> Running --(count reached | stop() | fatal error)--> Idle
//! ```
//!
//! The worker owns everything it touches: the source, the sink, its frame
//! buffer and a per-session cancel flag. The engine keeps the task handle,
//! so `stop()` can set the flag and join. The handle stays in the engine
//! until the task has finished, even while `stop()` is waiting on it.
//!
//! # Overflow
//!
//! A `BufferFull` insertion makes the worker ask the sink to clear its
//! backlog once and retry that one insertion once. Any other rejection, or a
//! second failure, ends the session.

use chrono::Utc;
use scope_core::data::{ChannelView, Frame};
use scope_core::error::{AppResult, DaqError};
use scope_core::host::{FrameSink, InsertOutcome};
use scope_core::metadata::{
    FrameMetadata, TAG_CAMERA, TAG_CHANNEL_INDEX, TAG_CHANNEL_NAME, TAG_ELAPSED_TIME,
    TAG_IMAGE_NUMBER, TAG_START_TIME,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::source::FrameSource;

/// Parameters of one live session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionRequest {
    /// Stop on its own after this many frames. `None` runs until stopped.
    pub frames: Option<u64>,
    /// Minimum time between frame starts.
    pub interval: Option<Duration>,
}

impl SessionRequest {
    /// Build from host-style arguments: a negative count means unbounded and
    /// a non-positive interval means free-running.
    pub fn from_host(count: i64, interval_ms: f64) -> Self {
        let frames = u64::try_from(count).ok();
        let interval = (interval_ms.is_finite() && interval_ms > 0.0)
            .then(|| Duration::from_secs_f64(interval_ms / 1000.0));
        Self { frames, interval }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn frames(count: u64) -> Self {
        Self {
            frames: Some(count),
            interval: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The requested frame count was delivered.
    Completed { frames: u64 },
    /// `stop()` (or dropping the engine) cancelled the session.
    Cancelled { frames: u64 },
    /// The frame source failed; capture is never retried.
    CaptureFailed { frames: u64, reason: String },
    /// The sink rejected an image.
    SinkFailed { frames: u64, reason: String },
}

impl SessionEnd {
    /// Frames fully delivered before the session ended.
    pub fn frames(&self) -> u64 {
        match self {
            SessionEnd::Completed { frames }
            | SessionEnd::Cancelled { frames }
            | SessionEnd::CaptureFailed { frames, .. }
            | SessionEnd::SinkFailed { frames, .. } => *frames,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionEnd::CaptureFailed { .. } | SessionEnd::SinkFailed { .. }
        )
    }
}

struct ActiveSession {
    cancel: Arc<AtomicBool>,
    sink: Arc<dyn FrameSink>,
    handle: JoinHandle<SessionEnd>,
    /// Closes when the worker drops its sender, on every exit path.
    exited: watch::Receiver<()>,
}

enum SessionSlot {
    Idle,
    /// `start()` is inside the sink's `prepare_for_acquisition`.
    Preparing,
    Active(ActiveSession),
}

impl SessionSlot {
    fn worker_alive(&self) -> bool {
        matches!(self, SessionSlot::Active(active) if !active.handle.is_finished())
    }

    fn take_active(&mut self) -> Option<ActiveSession> {
        match std::mem::replace(self, SessionSlot::Idle) {
            SessionSlot::Active(active) => Some(active),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// Holds the `Preparing` slot; releases it unless a worker was installed.
struct Reservation<'a> {
    slot: &'a Mutex<SessionSlot>,
    installed: bool,
}

impl Reservation<'_> {
    fn install(mut self, active: ActiveSession) {
        *lock(self.slot) = SessionSlot::Active(active);
        self.installed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.installed {
            *lock(self.slot) = SessionSlot::Idle;
        }
    }
}

/// Everything the worker needs, handed over at start.
struct Worker {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn FrameSink>,
    request: SessionRequest,
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    outcome: Arc<Mutex<Option<SessionEnd>>>,
    start_wall_ms: i64,
    started: Instant,
    _exited: watch::Sender<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background frame delivery for one camera.
pub struct LiveAcquisition {
    session: Mutex<SessionSlot>,
    frames: Arc<AtomicU64>,
    outcome: Arc<Mutex<Option<SessionEnd>>>,
}

impl LiveAcquisition {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(SessionSlot::Idle),
            frames: Arc::new(AtomicU64::new(0)),
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a session.
    ///
    /// Fails with [`DaqError::Busy`] while a worker is alive or another
    /// `start()` is preparing the host, leaving both untouched. The sink's
    /// `prepare_for_acquisition` runs before the worker is spawned and outside
    /// the session lock; a refusal is returned as [`DaqError::Host`].
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        &self,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        request: SessionRequest,
    ) -> AppResult<()> {
        let reservation = {
            let mut slot = lock(&self.session);
            if slot.worker_alive() || matches!(*slot, SessionSlot::Preparing) {
                return Err(DaqError::Busy);
            }
            // A finished worker has already notified its sink.
            *slot = SessionSlot::Preparing;
            Reservation {
                slot: &self.session,
                installed: false,
            }
        };

        let geometry = source.geometry();
        sink.prepare_for_acquisition(geometry)
            .map_err(DaqError::Host)?;

        self.frames.store(0, Ordering::SeqCst);
        *lock(&self.outcome) = None;

        let cancel = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited) = watch::channel(());
        let worker = Worker {
            source,
            sink: sink.clone(),
            request,
            cancel: cancel.clone(),
            frames: self.frames.clone(),
            outcome: self.outcome.clone(),
            start_wall_ms: Utc::now().timestamp_millis(),
            started: Instant::now(),
            _exited: exited_tx,
        };

        tracing::info!(
            frames = ?request.frames,
            interval = ?request.interval,
            width = geometry.width,
            height = geometry.height,
            channels = geometry.channels,
            "Live acquisition started"
        );

        let handle = tokio::spawn(worker.run());
        reservation.install(ActiveSession {
            cancel,
            sink,
            handle,
            exited,
        });
        Ok(())
    }

    /// Cancel the running session and wait for its worker to exit.
    ///
    /// No-op when idle. The session stays in place until its task has
    /// finished, so `is_running()` and `start()` see the worker for the whole
    /// join. The sink has been told the acquisition finished by the time
    /// this returns.
    pub async fn stop(&self) -> AppResult<()> {
        let (cancel, mut exited) = match &*lock(&self.session) {
            SessionSlot::Active(active) => {
                active.cancel.store(true, Ordering::SeqCst);
                (active.cancel.clone(), active.exited.clone())
            }
            _ => return Ok(()),
        };

        // Only ever closes; never carries a value.
        let _ = exited.changed().await;

        let active = loop {
            {
                let mut slot = lock(&self.session);
                let finished = match &*slot {
                    SessionSlot::Active(active) if Arc::ptr_eq(&active.cancel, &cancel) => {
                        active.handle.is_finished()
                    }
                    // Joined by a concurrent stop()
                    _ => return Ok(()),
                };
                if finished {
                    match slot.take_active() {
                        Some(active) => break active,
                        None => return Ok(()),
                    }
                }
            }
            tokio::task::yield_now().await;
        };

        match active.handle.await {
            Ok(end) => tracing::debug!(?end, "Live acquisition joined"),
            Err(e) => {
                // The worker died before it could notify the host.
                tracing::error!(error = %e, "Live acquisition worker aborted");
                active.sink.acquisition_finished();
            }
        }
        Ok(())
    }

    /// True from the worker's spawn until it has fully exited.
    pub fn is_running(&self) -> bool {
        lock(&self.session).worker_alive()
    }

    /// Frames delivered in the current (or last) session.
    pub fn frames_acquired(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// How the last session ended, once it has.
    pub fn last_outcome(&self) -> Option<SessionEnd> {
        lock(&self.outcome).clone()
    }
}

impl Default for LiveAcquisition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LiveAcquisition {
    fn drop(&mut self) {
        // The worker sees the flag on its next iteration and exits on its own.
        if let Some(active) = lock(&self.session).take_active() {
            active.cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl Worker {
    async fn run(self) -> SessionEnd {
        let end = self.drive().await;

        match &end {
            SessionEnd::Completed { frames } => {
                tracing::info!(frames, "Live acquisition completed")
            }
            SessionEnd::Cancelled { frames } => {
                tracing::info!(frames, "Live acquisition stopped")
            }
            SessionEnd::CaptureFailed { frames, reason } => {
                tracing::error!(frames, %reason, "Live acquisition terminated: capture failed")
            }
            SessionEnd::SinkFailed { frames, reason } => {
                tracing::error!(frames, %reason, "Live acquisition terminated: image insertion failed")
            }
        }

        *lock(&self.outcome) = Some(end.clone());
        self.sink.acquisition_finished();
        end
    }

    async fn drive(&self) -> SessionEnd {
        let mut frame = match Frame::new(self.source.geometry()) {
            Ok(frame) => frame,
            Err(e) => {
                return SessionEnd::CaptureFailed {
                    frames: 0,
                    reason: e.to_string(),
                }
            }
        };
        let mut delivered = 0u64;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return SessionEnd::Cancelled { frames: delivered };
            }
            if self.request.frames.is_some_and(|limit| delivered >= limit) {
                return SessionEnd::Completed { frames: delivered };
            }

            let frame_started = Instant::now();
            if let Err(e) = self.source.snap(&mut frame).await {
                return SessionEnd::CaptureFailed {
                    frames: delivered,
                    reason: e.to_string(),
                };
            }

            let base = self.frame_metadata(delivered);
            for channel in 0..frame.channels() {
                let Some(view) = frame.channel_view(channel) else {
                    continue;
                };
                let metadata = base
                    .clone()
                    .with(TAG_CHANNEL_INDEX, channel)
                    .with(TAG_CHANNEL_NAME, self.source.channel_name(channel));
                if let Err(reason) = self.deliver(&view, &metadata) {
                    return SessionEnd::SinkFailed {
                        frames: delivered,
                        reason,
                    };
                }
            }

            delivered += 1;
            self.frames.store(delivered, Ordering::SeqCst);

            match self.request.interval {
                Some(interval) => {
                    tokio::time::sleep(interval.saturating_sub(frame_started.elapsed())).await
                }
                None => tokio::task::yield_now().await,
            }
        }
    }

    fn frame_metadata(&self, image_number: u64) -> FrameMetadata {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        FrameMetadata::new()
            .with(TAG_CAMERA, self.source.label())
            .with(TAG_START_TIME, self.start_wall_ms)
            .with(TAG_ELAPSED_TIME, format!("{:.2}", elapsed_ms))
            .with(TAG_IMAGE_NUMBER, image_number)
    }

    fn deliver(&self, view: &ChannelView<'_>, metadata: &FrameMetadata) -> Result<(), String> {
        match self.sink.insert_image(view, metadata) {
            InsertOutcome::Inserted => Ok(()),
            InsertOutcome::Failed(reason) => Err(reason),
            InsertOutcome::BufferFull => {
                tracing::warn!(
                    channel = view.channel,
                    "Host buffer full, clearing backlog and retrying insertion"
                );
                self.sink.clear_buffer();
                match self.sink.insert_image(view, metadata) {
                    InsertOutcome::Inserted => Ok(()),
                    InsertOutcome::BufferFull => {
                        Err("host buffer still full after clearing".to_string())
                    }
                    InsertOutcome::Failed(reason) => Err(reason),
                }
            }
        }
    }
}
