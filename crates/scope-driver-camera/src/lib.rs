//! Simulated FastCamera adapter for scope hosts.
//!
//! # Components
//!
//! - [`FastCamera`] - the device: identity properties, geometry, exposure,
//!   single snaps and sequence acquisition
//! - [`LiveAcquisition`] - background frame delivery into a host
//!   [`FrameSink`](scope_core::FrameSink), with cooperative cancellation and
//!   a clear-once-retry-once overflow policy
//! - [`SimulatedSource`] - the sensor: moving test pattern or replayed frames
//! - [`CaptureFaults`] - seeded capture failure injection
//!
//! # Example
//!
//! ```rust,ignore
//! use scope_driver_camera::FastCamera;
//!
//! let mut camera = FastCamera::new()?;
//! camera.initialize()?;
//! camera.start_sequence_acquisition(100, 0.0, sink).await?;
//! // ...
//! camera.stop_sequence_acquisition().await?;
//! ```

pub mod config;
pub mod faults;
pub mod fast_camera;
pub mod live;
pub mod pattern;
pub mod source;

pub use config::CameraConfig;
pub use faults::{CaptureFaults, FaultConfig};
pub use fast_camera::{FastCamera, Roi, CAMERA_ID, CAMERA_NAME};
pub use live::{LiveAcquisition, SessionEnd, SessionRequest};
pub use pattern::generate_test_pattern;
pub use source::{FrameSource, SharedExposure, SimulatedSource, SourceMode};
