//! Captured frames.

use crate::error::{AppResult, CameraError};
use image::{DynamicImage, GrayImage, RgbImage};

/// One 8-bit monochrome frame read from the ring buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical, ever-increasing frame index (1 is the first captured frame).
    pub index: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major 8-bit pixels, `width * height` bytes.
    pub pixels: Vec<u8>,
}

impl Frame {
    /// View as a grayscale image. Fails when the pixel count is wrong.
    pub fn gray(&self) -> AppResult<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            CameraError::Grabber(format!(
                "frame {} holds {} bytes, expected {}x{}",
                self.index,
                self.pixels.len(),
                self.width,
                self.height
            ))
        })
    }

    /// Three-channel copy for video output.
    pub fn to_rgb(&self) -> AppResult<RgbImage> {
        Ok(DynamicImage::ImageLuma8(self.gray()?).to_rgb8())
    }
}
