//! Frame sources: the single-frame capture primitive behind snaps and live
//! acquisition.

use crate::faults::CaptureFaults;
use crate::pattern::fill_channel;
use async_trait::async_trait;
use scope_core::data::{Frame, FrameGeometry};
use scope_core::error::{AppResult, DaqError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Something that can fill a [`Frame`] with one image.
///
/// `snap` is the only capture primitive the live engine uses. It is called
/// with a buffer already sized for [`geometry`](Self::geometry).
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Value of the `Camera` metadata tag.
    fn label(&self) -> &str;

    fn geometry(&self) -> FrameGeometry;

    fn channel_name(&self, channel: u32) -> String {
        format!("Channel-{}", channel)
    }

    async fn snap(&self, frame: &mut Frame) -> AppResult<()>;
}

/// Where simulated pixels come from.
#[derive(Debug, Clone)]
pub enum SourceMode {
    /// Diagnostic test pattern that moves with the frame number.
    Synthetic,
    /// Pre-recorded multi-channel buffers, cycled in order.
    Replay(Arc<Vec<Vec<u8>>>),
}

/// Exposure in milliseconds, shared between a camera and its source.
#[derive(Debug, Clone, Default)]
pub struct SharedExposure(Arc<AtomicU64>);

impl SharedExposure {
    pub fn new(exposure_ms: f64) -> Self {
        let exposure = Self::default();
        exposure.set_ms(exposure_ms);
        exposure
    }

    pub fn set_ms(&self, exposure_ms: f64) {
        self.0.store(exposure_ms.to_bits(), Ordering::Relaxed);
    }

    pub fn ms(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.ms() / 1000.0).unwrap_or_default()
    }
}

/// The FastCamera's simulated sensor.
#[derive(Debug)]
pub struct SimulatedSource {
    label: String,
    geometry: FrameGeometry,
    mode: SourceMode,
    exposure: SharedExposure,
    simulate_exposure: bool,
    faults: CaptureFaults,
    snaps: Arc<AtomicU64>,
    replay_cursor: AtomicUsize,
}

impl SimulatedSource {
    pub fn new(label: impl Into<String>, geometry: FrameGeometry, exposure: SharedExposure) -> Self {
        Self {
            label: label.into(),
            geometry,
            mode: SourceMode::Synthetic,
            exposure,
            simulate_exposure: true,
            faults: CaptureFaults::none(),
            snaps: Arc::new(AtomicU64::new(0)),
            replay_cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_faults(mut self, faults: CaptureFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_simulated_exposure(mut self, enabled: bool) -> Self {
        self.simulate_exposure = enabled;
        self
    }

    /// Same sensor at a different geometry.
    ///
    /// Exposure and the snap counter stay shared with `self`; fault state and
    /// replay position start over.
    pub fn reshaped(&self, geometry: FrameGeometry) -> Self {
        Self {
            label: self.label.clone(),
            geometry,
            mode: self.mode.clone(),
            exposure: self.exposure.clone(),
            simulate_exposure: self.simulate_exposure,
            faults: CaptureFaults::from_config(&self.faults.config()),
            snaps: self.snaps.clone(),
            replay_cursor: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> &SourceMode {
        &self.mode
    }

    /// Total successful snaps, live frames included.
    pub fn snap_count(&self) -> u64 {
        self.snaps.load(Ordering::Relaxed)
    }

    fn render(&self, frame: &mut Frame, frame_num: u64) -> AppResult<()> {
        match &self.mode {
            SourceMode::Synthetic => {
                let g = frame.geometry();
                for channel in 0..g.channels {
                    if let Some(plane) = frame.channel_mut(channel) {
                        fill_channel(plane, g.width, g.height, g.bytes_per_pixel, frame_num, channel);
                    }
                }
                Ok(())
            }
            SourceMode::Replay(frames) => {
                if frames.is_empty() {
                    return Err(DaqError::Capture("no frames to replay".into()));
                }
                let index = self.replay_cursor.fetch_add(1, Ordering::Relaxed) % frames.len();
                let recorded = &frames[index];
                if recorded.len() != frame.len() {
                    return Err(DaqError::Capture(format!(
                        "replay frame {} is {} bytes, buffer is {}",
                        index,
                        recorded.len(),
                        frame.len()
                    )));
                }
                frame.as_bytes_mut().copy_from_slice(recorded);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl FrameSource for SimulatedSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    async fn snap(&self, frame: &mut Frame) -> AppResult<()> {
        let started = Instant::now();
        self.faults.check()?;

        if self.simulate_exposure {
            tokio::time::sleep(self.exposure.duration()).await;
        }

        let frame_num = self.snaps.load(Ordering::Relaxed);
        self.render(frame, frame_num)?;
        self.snaps.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            camera = %self.label,
            frame = frame_num,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "snap complete"
        );
        Ok(())
    }
}
