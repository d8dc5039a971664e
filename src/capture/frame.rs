//! Raw image to packed RGBA conversion: functional core.
//!
//! This module has zero infrastructure dependencies. Platform image
//! readers hand over planes with row padding; everything downstream
//! wants tightly packed RGBA rows.

use super::CaptureError;

/// Every captured frame is four bytes per pixel.
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
}

/// One plane of a raw image as the image reader exposes it.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes from the start of one row to the start of the next.
    pub row_stride: usize,
    /// Bytes from one pixel to the next within a row.
    pub pixel_stride: usize,
}

/// A frame straight off the image source, before validation.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// Exactly one captured frame: row-major RGBA8888, no padding.
pub struct CapturedFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CapturedFrame {
    /// Wraps an RGBA buffer. Length is checked by the encoder, not here.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Copies the first plane of `raw` into a tightly packed RGBA frame.
///
/// Row padding is dropped and BGRA input is swizzled. Anything we cannot
/// interpret (no planes, odd pixel stride, short buffer) means the source
/// is unusable for this capture.
pub fn frame_from_raw(raw: &RawImage) -> Result<CapturedFrame, CaptureError> {
    let plane = raw
        .planes
        .first()
        .ok_or_else(|| unavailable("image has no planes".to_string()))?;

    if raw.width == 0 || raw.height == 0 {
        return Err(unavailable(format!(
            "image has zero dimension ({}x{})",
            raw.width, raw.height
        )));
    }

    if plane.pixel_stride != BYTES_PER_PIXEL {
        return Err(unavailable(format!(
            "unexpected pixel stride {} (want {})",
            plane.pixel_stride, BYTES_PER_PIXEL
        )));
    }

    let width = raw.width as usize;
    let height = raw.height as usize;
    let row_bytes = width * BYTES_PER_PIXEL;

    if plane.row_stride < row_bytes {
        return Err(unavailable(format!(
            "row stride {} shorter than a row of {} bytes",
            plane.row_stride, row_bytes
        )));
    }

    // The last row may omit its padding.
    let needed = plane.row_stride * (height - 1) + row_bytes;
    if plane.data.len() < needed {
        return Err(unavailable(format!(
            "plane holds {} bytes, {}x{} needs {}",
            plane.data.len(),
            width,
            height,
            needed
        )));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * plane.row_stride;
        pixels.extend_from_slice(&plane.data[start..start + row_bytes]);
    }

    if raw.format == PixelFormat::Bgra8888 {
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
    }

    Ok(CapturedFrame::new(raw.width, raw.height, pixels))
}

fn unavailable(reason: String) -> CaptureError {
    CaptureError::CaptureSourceUnavailable(reason)
}
