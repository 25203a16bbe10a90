//! Decoded still frames.
//!
//! - `Frame`: one decoded RGB frame pulled from a stream.
//! - `to_jpeg()`: the only serialization path, used when handing images to the
//!   image store.

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// One decoded RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a frame from tightly packed RGB24 pixels.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB frame buffer rejected"))?;
        Ok(Self { image })
    }

    /// Decode an encoded still image (JPEG or PNG).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode image")?;
        Ok(Self {
            image: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .context("encode frame as jpeg")?;
        Ok(bytes)
    }
}
