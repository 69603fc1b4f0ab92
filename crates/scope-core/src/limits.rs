//! Shared hard limits to prevent unbounded allocations and unbounded waits.
//!
//! This module centralizes:
//! - Frame buffer size limits
//! - Default timeout durations for serial exchanges and busy-polling

use crate::error::DaqError;
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default timeout for reading one controller reply line (5 seconds).
pub const SERIAL_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for waiting until a stage reports ready (60 seconds).
///
/// Homing a long travel stage can take tens of seconds.
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default sleep between busy-poll status queries.
pub const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(5);

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum allowed frame payload in bytes, all channels included (default: 512MB).
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;
/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 65_536;

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Pixels in one channel plane.
    pub pixels: usize,
    /// Bytes in one channel plane.
    pub channel_bytes: usize,
    /// Bytes in the whole multi-channel buffer.
    pub bytes: usize,
}

/// Validate frame geometry and calculate sizes safely.
///
/// `bytes = width * height * bytes_per_pixel * channels`, checked for overflow.
pub fn validate_frame_size(
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    channels: usize,
) -> Result<FrameSize, DaqError> {
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(DaqError::FrameDimensionsTooLarge {
            width,
            height,
            max_dimension: MAX_FRAME_DIMENSION,
        });
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or(DaqError::SizeOverflow {
            context: "frame pixel count",
        })?;

    let channel_bytes = pixels
        .checked_mul(bytes_per_pixel)
        .ok_or(DaqError::SizeOverflow {
            context: "channel byte size",
        })?;

    let bytes = channel_bytes
        .checked_mul(channels)
        .ok_or(DaqError::SizeOverflow {
            context: "frame byte size",
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(DaqError::FrameTooLarge {
            bytes,
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    Ok(FrameSize {
        pixels,
        channel_bytes,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_multiply_through_channels() {
        let size = validate_frame_size(640, 480, 2, 3).unwrap();
        assert_eq!(size.pixels, 640 * 480);
        assert_eq!(size.channel_bytes, 640 * 480 * 2);
        assert_eq!(size.bytes, 640 * 480 * 2 * 3);
    }

    #[test]
    fn rejects_oversized_dimension() {
        let err = validate_frame_size(MAX_FRAME_DIMENSION + 1, 1, 1, 1).unwrap_err();
        assert!(matches!(err, DaqError::FrameDimensionsTooLarge { .. }));
    }

    #[test]
    fn rejects_oversized_payload() {
        let err = validate_frame_size(65_536, 65_536, 2, 3).unwrap_err();
        assert!(matches!(err, DaqError::FrameTooLarge { .. }));
    }
}
