use crate::error::AppResult;
use crate::limits::{validate_frame_size, FrameSize};

/// Pixel layout of a [`Frame`].
///
/// Channels are separately addressable planes; components describe how many
/// interleaved values make up one pixel inside a plane (e.g. RGB packed in
/// one channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel within one channel plane
    pub bytes_per_pixel: u32,
    /// Number of channel planes
    pub channels: u32,
    /// Number of components per pixel
    pub components: u32,
}

impl FrameGeometry {
    /// Validated byte sizes for this geometry.
    pub fn size(&self) -> AppResult<FrameSize> {
        validate_frame_size(
            self.width,
            self.height,
            self.bytes_per_pixel as usize,
            self.channels as usize,
        )
    }

    /// Bits per pixel (e.g., 8, 16)
    pub fn bit_depth(&self) -> u32 {
        8 * self.bytes_per_pixel
    }
}

/// A multi-channel image buffer owned by a camera.
///
/// # Storage
/// All channels live in one allocation, concatenated by channel index:
/// channel `i` occupies `[i * channel_len, (i + 1) * channel_len)`.
/// 16-bit pixels are stored Little Endian.
///
/// The buffer is `width * height * bytes_per_pixel * channels` bytes and is
/// replaced, not resized, whenever the geometry changes.
#[derive(Debug, Clone)]
pub struct Frame {
    geometry: FrameGeometry,
    channel_len: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame for the given geometry.
    pub fn new(geometry: FrameGeometry) -> AppResult<Self> {
        let size = geometry.size()?;
        Ok(Self {
            geometry,
            channel_len: size.channel_bytes,
            data: vec![0u8; size.bytes],
        })
    }

    /// Switch to a new geometry.
    ///
    /// Returns `true` when the buffer was reallocated. An unchanged geometry
    /// keeps the existing allocation and its contents.
    pub fn reconfigure(&mut self, geometry: FrameGeometry) -> AppResult<bool> {
        if geometry == self.geometry {
            return Ok(false);
        }
        *self = Self::new(geometry)?;
        Ok(true)
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.geometry.bytes_per_pixel
    }

    pub fn channels(&self) -> u32 {
        self.geometry.channels
    }

    /// Total buffer size in bytes, all channels included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of one channel plane in bytes.
    pub fn channel_len(&self) -> usize {
        self.channel_len
    }

    /// Whole multi-channel buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel data of one channel, or `None` if the index is out of range.
    pub fn channel(&self, index: u32) -> Option<&[u8]> {
        if index >= self.geometry.channels {
            return None;
        }
        let start = index as usize * self.channel_len;
        self.data.get(start..start + self.channel_len)
    }

    pub fn channel_mut(&mut self, index: u32) -> Option<&mut [u8]> {
        if index >= self.geometry.channels {
            return None;
        }
        let start = index as usize * self.channel_len;
        self.data.get_mut(start..start + self.channel_len)
    }

    /// Borrowed view of one channel, suitable for handing to a frame sink.
    pub fn channel_view(&self, index: u32) -> Option<ChannelView<'_>> {
        self.channel(index).map(|pixels| ChannelView {
            pixels,
            width: self.geometry.width,
            height: self.geometry.height,
            bytes_per_pixel: self.geometry.bytes_per_pixel,
            channel: index,
        })
    }

    /// Write 16-bit pixels into one channel (Little Endian).
    ///
    /// Copies at most one channel's worth of pixels.
    pub fn write_channel_u16(&mut self, index: u32, pixels: &[u16]) -> bool {
        let Some(plane) = self.channel_mut(index) else {
            return false;
        };
        for (dst, px) in plane.chunks_exact_mut(2).zip(pixels) {
            dst.copy_from_slice(&px.to_le_bytes());
        }
        true
    }
}

/// Zero-copy view of one channel plane of a [`Frame`].
///
/// This is what a host sink receives for every insertion: the pixel bytes
/// plus the geometry needed to interpret them.
#[derive(Debug, Clone, Copy)]
pub struct ChannelView<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub channel: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32, bpp: u32, channels: u32) -> FrameGeometry {
        FrameGeometry {
            width,
            height,
            bytes_per_pixel: bpp,
            channels,
            components: 1,
        }
    }

    #[test]
    fn buffer_size_is_product_of_geometry() {
        for &(w, h, bpp, ch) in &[(1, 1, 1, 1), (64, 32, 2, 3), (2304, 2304, 2, 3), (7, 5, 4, 2)] {
            let frame = Frame::new(geometry(w, h, bpp, ch)).unwrap();
            assert_eq!(frame.len(), (w * h * bpp * ch) as usize);
            assert_eq!(frame.channel_len(), (w * h * bpp) as usize);
        }
    }

    #[test]
    fn channels_are_concatenated_by_index() {
        let mut frame = Frame::new(geometry(2, 2, 1, 3)).unwrap();
        frame.channel_mut(1).unwrap().fill(7);

        assert_eq!(frame.as_bytes(), &[0, 0, 0, 0, 7, 7, 7, 7, 0, 0, 0, 0]);
        assert!(frame.channel(3).is_none());
    }

    #[test]
    fn reconfigure_reallocates_only_on_change() {
        let mut frame = Frame::new(geometry(4, 4, 2, 1)).unwrap();
        frame.as_bytes_mut()[0] = 42;

        assert!(!frame.reconfigure(geometry(4, 4, 2, 1)).unwrap());
        assert_eq!(frame.as_bytes()[0], 42);

        assert!(frame.reconfigure(geometry(8, 4, 2, 2)).unwrap());
        assert_eq!(frame.len(), 8 * 4 * 2 * 2);
        assert_eq!(frame.as_bytes()[0], 0);
    }

    #[test]
    fn channel_view_carries_geometry() {
        let frame = Frame::new(geometry(3, 2, 2, 2)).unwrap();
        let view = frame.channel_view(1).unwrap();
        assert_eq!(view.pixels.len(), 12);
        assert_eq!((view.width, view.height, view.bytes_per_pixel), (3, 2, 2));
        assert_eq!(view.channel, 1);
    }

    #[test]
    fn write_channel_u16_is_little_endian() {
        let mut frame = Frame::new(geometry(2, 1, 2, 1)).unwrap();
        assert!(frame.write_channel_u16(0, &[0x0102, 0x0304]));
        assert_eq!(frame.as_bytes(), &[0x02, 0x01, 0x04, 0x03]);
        assert!(!frame.write_channel_u16(1, &[0]));
    }
}
