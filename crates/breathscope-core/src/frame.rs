//! Frame type for RGBA8 video frames in CPU memory.
//!
//! Frames arrive from external decode already cropped to the region of
//! interest and are immutable once constructed.

use crate::error::{MagnifyError, Result};
use std::sync::Arc;

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// An immutable RGBA8 frame, tightly packed (row pitch = `width * 4`).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
    timestamp: Option<f64>,
}

impl Frame {
    /// Wrap raw RGBA8 bytes. The buffer length must be exactly
    /// `width * height * 4` and both dimensions must be non-zero.
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Result<Self> {
        let data = data.into();
        if width == 0 || height == 0 {
            return Err(MagnifyError::InvalidInput(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = Self::byte_len(width, height);
        if data.len() != expected {
            return Err(MagnifyError::InvalidInput(format!(
                "frame buffer is {} bytes, expected {} for {}x{} RGBA8",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp: None,
        })
    }

    /// Attach a capture timestamp in seconds.
    pub fn with_timestamp(mut self, seconds: f64) -> Self {
        self.timestamp = Some(seconds);
        self
    }

    /// A frame filled with a single color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(Self::byte_len(width, height))
            .collect();
        Self::new(width, height, data)
    }

    /// Build a frame by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(Self::byte_len(width, height));
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self::new(width, height, data)
    }

    /// Create a test pattern frame (8 vertical color bars).
    pub fn test_pattern(width: u32, height: u32) -> Result<Self> {
        const COLORS: [[u8; 4]; 8] = [
            [255, 255, 255, 255], // White
            [255, 255, 0, 255],   // Yellow
            [0, 255, 255, 255],   // Cyan
            [0, 255, 0, 255],     // Green
            [255, 0, 255, 255],   // Magenta
            [255, 0, 0, 255],     // Red
            [0, 0, 255, 255],     // Blue
            [0, 0, 0, 255],       // Black
        ];
        Self::from_fn(width, height, |x, _| COLORS[(x * 8 / width) as usize])
    }

    /// Required buffer length for a `width x height` RGBA8 frame.
    #[inline]
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA8 bytes, row-major.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    /// Row pitch in bytes.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Pixel at `(x, y)`. Panics when out of bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Whether `other` has the same dimensions.
    pub fn same_shape(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let err = Frame::new(4, 4, vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, MagnifyError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        assert!(Frame::new(0, 4, Vec::<u8>::new()).is_err());
    }

    #[test]
    fn test_solid_and_pixel() {
        let frame = Frame::solid(3, 2, [10, 20, 30, 255]).unwrap();
        assert_eq!(frame.data().len(), 24);
        assert_eq!(frame.pixel(2, 1), [10, 20, 30, 255]);
        assert_eq!(frame.stride(), 12);
    }

    #[test]
    fn test_test_pattern() {
        let frame = Frame::test_pattern(64, 8).unwrap();
        assert_eq!(frame.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(63, 7), [0, 0, 0, 255]);
    }

    #[test]
    fn test_timestamp_is_optional() {
        let frame = Frame::solid(1, 1, [0; 4]).unwrap();
        assert_eq!(frame.timestamp(), None);
        assert_eq!(frame.with_timestamp(0.5).timestamp(), Some(0.5));
    }
}
