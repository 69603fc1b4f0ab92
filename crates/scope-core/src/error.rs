//! Error taxonomy shared by the camera and stage adapters.
//!
//! Every operation a host can invoke on either adapter returns [`AppResult`].
//! Each variant maps to its own host error code:
//!
//! - **Acquisition**: `Busy`, `Capture`, `Host`
//! - **Motion / protocol**: `PositionBeyondLimits`, `ControllerError`, `Parse`,
//!   `Timeout`
//! - **Transport**: `Io`, `SerialUnexpectedEof` (propagated unchanged from the
//!   serial layer)
//! - **Configuration / properties**: `Configuration`, `InvalidParameter`,
//!   `PortChangeForbidden`, `PreInitOnly`, `ParameterReadOnly`,
//!   `ParameterInvalidChoice`, `NotInitialized`
//! - **Buffer sizing**: `FrameDimensionsTooLarge`, `SizeOverflow`, `FrameTooLarge`
//!
//! Failures inside the live-acquisition worker never cross the task boundary;
//! they end the session and are only visible through logs and
//! `is_running()` turning false.

use thiserror::Error;

/// Convenience alias for results using the adapter error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the device adapters.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A live-acquisition session is already running on this camera.
    ///
    /// Returned by `start()` without touching the running session, and by
    /// geometry changes attempted mid-acquisition.
    #[error("Camera is busy: a live acquisition is already running")]
    Busy,

    /// Requested absolute position falls outside the configured limits.
    ///
    /// All three values are in native controller units (e.g. millimeters),
    /// compared after user-unit conversion.
    #[error("Requested position {requested} is beyond the limits of this stage [{lower}, {upper}]")]
    PositionBeyondLimits {
        requested: f64,
        lower: f64,
        upper: f64,
    },

    /// The motion controller reported a fault.
    ///
    /// `code` is the raw status character the controller returned in reply
    /// to an error query.
    #[error("Device returned error code: {code}")]
    ControllerError { code: char },

    /// An operation did not complete before its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A controller reply could not be decoded.
    #[error("Failed to parse controller reply: {0}")]
    Parse(String),

    /// Transport-level I/O failure.
    ///
    /// **Source**: Wraps `std::io::Error` from the serial port or stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial stream closed while a reply was expected.
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A runtime argument was rejected (e.g. non-positive exposure).
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The serial port cannot be changed once the device is initialized.
    #[error("Port change forbidden after initialization")]
    PortChangeForbidden,

    /// A pre-initialization property was written after `initialize()`.
    #[error("Property '{0}' can only be changed before initialization")]
    PreInitOnly(String),

    /// Operation requires an initialized device.
    #[error("Device is not initialized")]
    NotInitialized,

    /// Attempt to write a read-only property.
    #[error("Parameter is read-only")]
    ParameterReadOnly,

    /// Value is not among a property's allowed values.
    #[error("Invalid choice for parameter")]
    ParameterInvalidChoice,

    /// The host refused to prepare for an acquisition.
    #[error("Host rejected acquisition: {0}")]
    Host(String),

    /// Single-frame capture failed.
    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Frame dimensions {width}x{height} exceed maximum {max_dimension} per dimension")]
    FrameDimensionsTooLarge {
        width: u32,
        height: u32,
        max_dimension: u32,
    },

    #[error("Size overflow while computing {context}")]
    SizeOverflow { context: &'static str },

    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge { bytes: usize, max_bytes: usize },
}
