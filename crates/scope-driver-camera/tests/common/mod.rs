//! Shared helpers for live acquisition tests.
//!
//! - `RecordingSink`: frame sink that records every call and can be scripted
//!   to answer `BufferFull` / `Failed` on chosen insertions
//! - `CountingSource`: tiny deterministic frame source
//! - `wait_until`: poll a condition with a deadline

#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use scope_core::data::{ChannelView, Frame, FrameGeometry};
use scope_core::error::{AppResult, DaqError};
use scope_core::host::{FrameSink, InsertOutcome};
use scope_core::metadata::FrameMetadata;
use scope_driver_camera::FrameSource;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One accepted insertion.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub channel: u32,
    pub bytes: usize,
    pub metadata: FrameMetadata,
}

#[derive(Debug, Default)]
struct SinkState {
    script: VecDeque<InsertOutcome>,
    delivered: Vec<Delivered>,
    insert_calls: usize,
    clears: usize,
    prepared: Vec<FrameGeometry>,
    finished: usize,
    refuse_prepare: Option<String>,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
    prepare_calls: AtomicUsize,
    prepare_delay: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next insertions with these outcomes, then `Inserted`.
    pub fn scripted(outcomes: impl IntoIterator<Item = InsertOutcome>) -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().script = outcomes.into_iter().collect();
        sink
    }

    pub fn refusing(reason: &str) -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().refuse_prepare = Some(reason.to_string());
        sink
    }

    /// Block inside `prepare_for_acquisition` like a slow host would.
    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = delay;
        self
    }

    /// Calls that have entered `prepare_for_acquisition`, finished or not.
    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.state.lock().unwrap().insert_calls
    }

    pub fn clears(&self) -> usize {
        self.state.lock().unwrap().clears
    }

    pub fn prepared(&self) -> usize {
        self.state.lock().unwrap().prepared.len()
    }

    pub fn finished(&self) -> usize {
        self.state.lock().unwrap().finished
    }
}

impl FrameSink for RecordingSink {
    fn prepare_for_acquisition(&self, geometry: FrameGeometry) -> Result<(), String> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if !self.prepare_delay.is_zero() {
            std::thread::sleep(self.prepare_delay);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.refuse_prepare {
            return Err(reason.clone());
        }
        state.prepared.push(geometry);
        Ok(())
    }

    fn insert_image(&self, image: &ChannelView<'_>, metadata: &FrameMetadata) -> InsertOutcome {
        let mut state = self.state.lock().unwrap();
        state.insert_calls += 1;
        let outcome = state.script.pop_front().unwrap_or(InsertOutcome::Inserted);
        if outcome.is_inserted() {
            state.delivered.push(Delivered {
                channel: image.channel,
                bytes: image.pixels.len(),
                metadata: metadata.clone(),
            });
        }
        outcome
    }

    fn clear_buffer(&self) {
        self.state.lock().unwrap().clears += 1;
    }

    fn acquisition_finished(&self) {
        self.state.lock().unwrap().finished += 1;
    }
}

/// Fills every byte of a frame with the snap number; can fail on a chosen snap.
pub struct CountingSource {
    geometry: FrameGeometry,
    snaps: AtomicU64,
    fail_on: Option<u64>,
    delay: Duration,
}

impl CountingSource {
    pub fn new(channels: u32) -> Self {
        Self {
            geometry: FrameGeometry {
                width: 4,
                height: 2,
                bytes_per_pixel: 2,
                channels,
                components: 1,
            },
            snaps: AtomicU64::new(0),
            fail_on: None,
            delay: Duration::ZERO,
        }
    }

    /// Fail the snap with this zero-based index.
    pub fn failing_on(mut self, snap: u64) -> Self {
        self.fail_on = Some(snap);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn snaps(&self) -> u64 {
        self.snaps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for CountingSource {
    fn label(&self) -> &str {
        "TestCamera"
    }

    fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    async fn snap(&self, frame: &mut Frame) -> AppResult<()> {
        let n = self.snaps.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(n) {
            return Err(DaqError::Capture(format!("sensor fault on snap {}", n)));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        frame.as_bytes_mut().fill(n as u8);
        Ok(())
    }
}

/// Poll `condition` every millisecond for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5 s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
