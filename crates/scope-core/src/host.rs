//! Host-side collaborators the adapters push data into.
//!
//! The host application owns the image pipeline (its circular buffer, display
//! and storage). Adapters only see it through [`FrameSink`].

use crate::data::{ChannelView, FrameGeometry};
use crate::metadata::FrameMetadata;

/// Result of offering one image to the host pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Image accepted.
    Inserted,
    /// The host buffer is full; the image was not stored.
    BufferFull,
    /// Any other rejection. Carries the host's reason.
    Failed(String),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

/// Destination for frames produced by a live acquisition.
///
/// All methods are synchronous and may block (e.g. on buffer contention);
/// the acquisition worker absorbs that as backpressure. Implementations must
/// be thread-safe because they are called from the worker task.
pub trait FrameSink: Send + Sync {
    /// Called once before the worker starts so the host can size its buffer.
    ///
    /// An error aborts the start request.
    fn prepare_for_acquisition(&self, geometry: FrameGeometry) -> Result<(), String>;

    /// Offer one channel image together with its metadata.
    fn insert_image(&self, image: &ChannelView<'_>, metadata: &FrameMetadata) -> InsertOutcome;

    /// Drop whatever backlog the host is holding.
    fn clear_buffer(&self);

    /// Called exactly once when a session ends, however it ended.
    fn acquisition_finished(&self);
}
