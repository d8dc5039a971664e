//! Frame encoding: functional core.
//!
//! RGBA frame in, JPEG bytes plus their base64 text out. No I/O, no
//! infrastructure dependencies. Alpha is dropped (screens are opaque).

use crate::capture::{CapturedFrame, BYTES_PER_PIXEL};
use crate::config::{EncoderConfig, DEFAULT_JPEG_QUALITY};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use sha2::{Digest, Sha256};
use std::time::Instant;

pub const JPEG_MIME: &str = "image/jpeg";

/// Immutable transport payload for one frame.
pub struct EncodedImage {
    bytes: Vec<u8>,
    base64: String,
    width: u32,
    height: u32,
    digest: String,
}

impl EncodedImage {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn mime_type(&self) -> &'static str {
        JPEG_MIME
    }

    /// `data:` URL form accepted by vision chat endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", JPEG_MIME, self.base64)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Short SHA-256 prefix of the JPEG bytes, for log correlation.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .field("digest", &self.digest)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("JPEG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Image decoding failed: {0}")]
    DecodingFailed(String),
}

#[derive(Debug, Clone)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder {
    /// `quality` is clamped to the JPEG range 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(config.jpeg_quality)
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compresses the frame and releases its raw buffer.
    pub fn encode(&self, frame: CapturedFrame) -> Result<EncodedImage, EncodeError> {
        let start = Instant::now();
        let (width, height) = (frame.width(), frame.height());
        check_dimensions(width, height, frame.pixels().len())?;

        let rgba = RgbaImage::from_raw(width, height, frame.into_pixels()).ok_or_else(|| {
            EncodeError::MalformedFrame(format!("buffer does not fit {}x{}", width, height))
        })?;
        let rgb = DynamicImage::ImageRgba8(rgba).into_rgb8();

        let mut bytes: Vec<u8> = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&rgb)
            .map_err(|e| EncodeError::EncodingFailed(e.to_string()))?;

        let base64 = STANDARD.encode(&bytes);
        let digest = format!("{:x}", Sha256::digest(&bytes));

        log::info!(
            "[ENCODE] {}x{} -> {} bytes JPEG (q={}, {} base64 chars) in {}ms",
            width,
            height,
            bytes.len(),
            self.quality,
            base64.len(),
            start.elapsed().as_millis()
        );

        Ok(EncodedImage {
            bytes,
            base64,
            width,
            height,
            digest: digest[..12].to_string(),
        })
    }

    /// Decodes a payload back into an RGBA frame (alpha is always 255).
    pub fn decode(&self, image: &EncodedImage) -> Result<CapturedFrame, EncodeError> {
        decode_jpeg(image.bytes())
    }

    /// Same as [`decode`](Self::decode), starting from the base64 text.
    pub fn decode_base64(&self, text: &str) -> Result<CapturedFrame, EncodeError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| EncodeError::DecodingFailed(format!("invalid base64: {}", e)))?;
        decode_jpeg(&bytes)
    }
}

fn check_dimensions(width: u32, height: u32, len: usize) -> Result<(), EncodeError> {
    if width == 0 || height == 0 {
        return Err(EncodeError::MalformedFrame(format!(
            "zero dimension ({}x{})",
            width, height
        )));
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| {
            EncodeError::MalformedFrame(format!("{}x{} overflows a buffer", width, height))
        })?;
    if len != expected {
        return Err(EncodeError::MalformedFrame(format!(
            "buffer is {} bytes, {}x{} RGBA needs {}",
            len, width, height, expected
        )));
    }
    Ok(())
}

fn decode_jpeg(bytes: &[u8]) -> Result<CapturedFrame, EncodeError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| EncodeError::DecodingFailed(e.to_string()))?;
    let rgba = image.into_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    Ok(CapturedFrame::new(width, height, rgba.into_raw()))
}
