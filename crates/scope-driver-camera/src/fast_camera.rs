//! FastCamera: a simulated multi-channel camera.
//!
//! Frames come from a [`SimulatedSource`] (test pattern or replayed
//! buffers). Single snaps fill the camera's own buffer; sequence acquisition
//! runs through [`LiveAcquisition`] with a snapshot of the source.

use crate::config::CameraConfig;
use crate::faults::CaptureFaults;
use crate::live::{LiveAcquisition, SessionEnd, SessionRequest};
use crate::source::{FrameSource, SharedExposure, SimulatedSource, SourceMode};
use scope_core::data::{Frame, FrameGeometry};
use scope_core::error::{AppResult, DaqError};
use scope_core::host::FrameSink;
use scope_core::property::{PropertyDescriptor, PropertySet, PropertyValue};
use std::sync::Arc;
use tracing::instrument;

pub const CAMERA_NAME: &str = "FastCamera";
pub const CAMERA_DESCRIPTION: &str = "Simulated high-speed camera";
pub const CAMERA_MODEL: &str = "Fake camera adapter";
pub const CAMERA_ID: &str = "FastCameraV0.1";

pub const PROP_NAME: &str = "Name";
pub const PROP_DESCRIPTION: &str = "Description";
pub const PROP_CAMERA_NAME: &str = "CameraName";
pub const PROP_CAMERA_ID: &str = "CameraID";
pub const PROP_BINNING: &str = "Binning";
pub const PROP_EXPOSURE: &str = "Exposure";

/// Region of interest in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub struct FastCamera {
    frame: Frame,
    exposure: SharedExposure,
    source: Arc<SimulatedSource>,
    live: LiveAcquisition,
    properties: PropertySet,
    initialized: bool,
}

impl FastCamera {
    pub fn new() -> AppResult<Self> {
        Self::with_config(CameraConfig::default())
    }

    pub fn with_config(config: CameraConfig) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| DaqError::Configuration(e.to_string()))?;

        let geometry = config.geometry();
        let exposure = SharedExposure::new(config.exposure_ms);
        let source = SimulatedSource::new(CAMERA_NAME, geometry, exposure.clone())
            .with_simulated_exposure(config.simulate_exposure)
            .with_faults(CaptureFaults::from_config(&config.faults));

        let mut properties = PropertySet::new();
        properties.register(PropertyDescriptor::new(PROP_NAME, CAMERA_NAME).read_only());
        properties
            .register(PropertyDescriptor::new(PROP_DESCRIPTION, CAMERA_DESCRIPTION).read_only());
        properties.register(PropertyDescriptor::new(PROP_CAMERA_NAME, CAMERA_MODEL).read_only());
        properties.register(PropertyDescriptor::new(PROP_CAMERA_ID, CAMERA_ID).read_only());
        properties.register(PropertyDescriptor::new(PROP_BINNING, "1").with_allowed_values(["1"]));
        properties.register(
            PropertyDescriptor::new(PROP_EXPOSURE, config.exposure_ms)
                .with_limits(f64::MIN_POSITIVE, f64::MAX),
        );

        Ok(Self {
            frame: Frame::new(geometry)?,
            exposure,
            source: Arc::new(source),
            live: LiveAcquisition::new(),
            properties,
            initialized: false,
        })
    }

    pub fn name(&self) -> &'static str {
        CAMERA_NAME
    }

    pub fn initialize(&mut self) -> AppResult<()> {
        self.initialized = true;
        tracing::info!(camera = CAMERA_NAME, "Camera initialized");
        Ok(())
    }

    /// Stops any live session, then marks the camera uninitialized.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.live.stop().await?;
        self.initialized = false;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Host-side property write.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> AppResult<()> {
        let descriptor = self
            .properties
            .get(name)
            .ok_or_else(|| DaqError::InvalidParameter(format!("unknown property '{}'", name)))?;
        descriptor.validate(&value, self.initialized)?;

        match (name, &value) {
            (PROP_BINNING, _) => Ok(()),
            (PROP_EXPOSURE, PropertyValue::Float(ms)) => self.set_exposure(*ms),
            (PROP_EXPOSURE, PropertyValue::Integer(ms)) => self.set_exposure(*ms as f64),
            _ => Err(DaqError::ParameterReadOnly),
        }
    }

    /// Current value of a property as the host would display it.
    pub fn get_property(&self, name: &str) -> AppResult<PropertyValue> {
        match name {
            PROP_EXPOSURE => Ok(PropertyValue::Float(self.exposure())),
            PROP_BINNING => Ok(PropertyValue::String(self.binning().to_string())),
            _ => self
                .properties
                .get(name)
                .map(|p| p.default.clone())
                .ok_or_else(|| DaqError::InvalidParameter(format!("unknown property '{}'", name))),
        }
    }

    // -- geometry ------------------------------------------------------------

    pub fn geometry(&self) -> FrameGeometry {
        self.frame.geometry()
    }

    pub fn image_width(&self) -> u32 {
        self.frame.width()
    }

    pub fn image_height(&self) -> u32 {
        self.frame.height()
    }

    pub fn image_bytes_per_pixel(&self) -> u32 {
        self.frame.bytes_per_pixel()
    }

    pub fn bit_depth(&self) -> u32 {
        self.frame.geometry().bit_depth()
    }

    pub fn number_of_channels(&self) -> u32 {
        self.frame.channels()
    }

    pub fn number_of_components(&self) -> u32 {
        self.frame.geometry().components
    }

    /// Bytes in the whole multi-channel buffer.
    pub fn image_buffer_size(&self) -> usize {
        self.frame.len()
    }

    /// Change width, height and channel count, reallocating the buffer.
    #[instrument(skip(self), err)]
    pub fn set_geometry(&mut self, width: u32, height: u32, channels: u32) -> AppResult<()> {
        if self.live.is_running() {
            return Err(DaqError::Busy);
        }
        let geometry = FrameGeometry {
            width,
            height,
            channels,
            ..self.frame.geometry()
        };
        if width == 0 || height == 0 || channels == 0 {
            return Err(DaqError::InvalidParameter(format!(
                "geometry {}x{}x{} has a zero dimension",
                width, height, channels
            )));
        }
        if self.frame.reconfigure(geometry)? {
            self.source = Arc::new(self.source.reshaped(geometry));
            tracing::debug!(bytes = self.frame.len(), "Frame buffer reallocated");
        }
        Ok(())
    }

    // -- exposure, binning, ROI ----------------------------------------------

    pub fn exposure(&self) -> f64 {
        self.exposure.ms()
    }

    /// Exposure in milliseconds. Applies to live sessions immediately.
    pub fn set_exposure(&mut self, exposure_ms: f64) -> AppResult<()> {
        if !(exposure_ms.is_finite() && exposure_ms > 0.0) {
            return Err(DaqError::InvalidParameter(format!(
                "exposure must be positive, got {} ms",
                exposure_ms
            )));
        }
        self.exposure.set_ms(exposure_ms);
        Ok(())
    }

    pub fn is_exposure_sequenceable(&self) -> bool {
        false
    }

    pub fn binning(&self) -> u32 {
        1
    }

    pub fn set_binning(&mut self, bin_size: u32) -> AppResult<()> {
        if bin_size != 1 {
            return Err(DaqError::InvalidParameter(format!(
                "binning {} not supported, only 1",
                bin_size
            )));
        }
        Ok(())
    }

    /// Only the full frame is supported; any request leaves it in place.
    pub fn set_roi(&mut self, roi: Roi) -> AppResult<()> {
        if roi != self.roi() {
            tracing::debug!(?roi, "ROI not supported, keeping full frame");
        }
        Ok(())
    }

    pub fn roi(&self) -> Roi {
        Roi {
            x: 0,
            y: 0,
            width: self.frame.width(),
            height: self.frame.height(),
        }
    }

    pub fn clear_roi(&mut self) -> AppResult<()> {
        Ok(())
    }

    // -- frame source ----------------------------------------------------------

    /// Replay recorded multi-channel buffers instead of the test pattern.
    ///
    /// Every buffer must match [`image_buffer_size`](Self::image_buffer_size).
    pub fn set_replay_frames(&mut self, frames: Vec<Vec<u8>>) -> AppResult<()> {
        if self.live.is_running() {
            return Err(DaqError::Busy);
        }
        if frames.is_empty() {
            return Err(DaqError::InvalidParameter("no replay frames given".into()));
        }
        if let Some((index, bad)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.len() != self.frame.len())
        {
            return Err(DaqError::InvalidParameter(format!(
                "replay frame {} is {} bytes, expected {}",
                index,
                bad.len(),
                self.frame.len()
            )));
        }
        self.source = Arc::new(
            self.source
                .reshaped(self.geometry())
                .with_mode(SourceMode::Replay(Arc::new(frames))),
        );
        Ok(())
    }

    pub fn use_synthetic_frames(&mut self) -> AppResult<()> {
        if self.live.is_running() {
            return Err(DaqError::Busy);
        }
        self.source = Arc::new(
            self.source
                .reshaped(self.geometry())
                .with_mode(SourceMode::Synthetic),
        );
        Ok(())
    }

    pub fn set_faults(&mut self, faults: CaptureFaults) -> AppResult<()> {
        if self.live.is_running() {
            return Err(DaqError::Busy);
        }
        self.source = Arc::new(self.source.reshaped(self.geometry()).with_faults(faults));
        Ok(())
    }

    // -- capture ---------------------------------------------------------------

    /// Capture one frame into the camera's buffer.
    ///
    /// Fails with [`DaqError::Busy`] during live acquisition, which owns the
    /// source until its worker exits.
    #[instrument(skip(self), fields(camera = CAMERA_NAME), err)]
    pub async fn snap_image(&mut self) -> AppResult<()> {
        if self.live.is_running() {
            return Err(DaqError::Busy);
        }
        self.source.snap(&mut self.frame).await
    }

    /// Channel data from the last snap.
    pub fn image_buffer(&self, channel: u32) -> Option<&[u8]> {
        self.frame.channel(channel)
    }

    /// Successful snaps so far, live frames included.
    pub fn snap_count(&self) -> u64 {
        self.source.snap_count()
    }

    // -- sequence acquisition --------------------------------------------------

    /// Start live acquisition into `sink`.
    ///
    /// `count < 0` runs until stopped; a positive `interval_ms` paces frames.
    #[instrument(skip(self, sink), fields(camera = CAMERA_NAME), err)]
    pub async fn start_sequence_acquisition(
        &self,
        count: i64,
        interval_ms: f64,
        sink: Arc<dyn FrameSink>,
    ) -> AppResult<()> {
        let source: Arc<dyn FrameSource> = self.source.clone();
        self.live
            .start(source, sink, SessionRequest::from_host(count, interval_ms))
            .await
    }

    pub async fn stop_sequence_acquisition(&self) -> AppResult<()> {
        self.live.stop().await
    }

    pub fn is_capturing(&self) -> bool {
        self.live.is_running()
    }

    pub fn frames_acquired(&self) -> u64 {
        self.live.frames_acquired()
    }

    pub fn last_outcome(&self) -> Option<SessionEnd> {
        self.live.last_outcome()
    }
}
