//! `scope-core`
//!
//! Shared building blocks for the scope device adapters.
//!
//! The adapters plug into a host application that owns the property table,
//! the image pipeline and device registration. This crate defines what both
//! adapters hand across that boundary:
//!
//! - [`DaqError`] / [`AppResult`]: typed errors returned by every adapter call
//! - [`Frame`] / [`ChannelView`]: multi-channel pixel buffers
//! - [`FrameMetadata`]: per-frame string tags
//! - [`FrameSink`]: the push interface a host exposes for live images
//! - [`PropertyDescriptor`]: how adapters describe their host-visible properties
//! - [`serial`]: shared async serial port plumbing

pub mod data;
pub mod error;
pub mod host;
pub mod limits;
pub mod metadata;
pub mod property;
pub mod serial;

pub use data::{ChannelView, Frame, FrameGeometry};
pub use error::{AppResult, DaqError};
pub use host::{FrameSink, InsertOutcome};
pub use metadata::FrameMetadata;
pub use property::{PropertyDescriptor, PropertyKind, PropertySet, PropertyValue};
