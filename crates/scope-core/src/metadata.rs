//! Per-frame metadata tags.
//!
//! A [`FrameMetadata`] is an ordered list of string tags attached to one
//! delivered image. It is built fresh for every frame and handed to the sink
//! by shared reference, so it is never mutated after delivery.

use serde::Serialize;

/// Tag naming the camera that produced the image.
pub const TAG_CAMERA: &str = "Camera";
/// Wall-clock session start, milliseconds since the Unix epoch.
pub const TAG_START_TIME: &str = "StartTime-ms";
/// Milliseconds elapsed since the session started.
pub const TAG_ELAPSED_TIME: &str = "ElapsedTime-ms";
/// Zero-based sequence number of the frame within the session.
pub const TAG_IMAGE_NUMBER: &str = "ImageNumber";
pub const TAG_CHANNEL_INDEX: &str = "CameraChannelIndex";
pub const TAG_CHANNEL_NAME: &str = "CameraChannelName";

/// Ordered set of string-valued tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameMetadata {
    tags: Vec<(String, String)>,
}

impl FrameMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing an existing value in place to keep ordering stable.
    pub fn put(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.tags.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.tags.push((key, value)),
        }
    }

    /// Builder-style [`put`](Self::put).
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.put(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize as a JSON object, preserving tag order.
    pub fn to_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}
