//! Decoded images

use eyre::{Context, Result};
use image::ImageEncoder;

use crate::tensor::Tensor;

/// One decoded RGB8 image
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub width: u32,
    pub height: u32,
    /// Interleaved RGB, row-major
    pub pixels: Vec<u8>,
}

impl GeneratedImage {
    /// Split decoder output `[batch, 3, height, width]` in [-1, 1] into images
    ///
    /// Values map through `(v / 2 + 0.5).clamp(0, 1) * 255`.
    pub fn from_decoder_output(pixels: &Tensor) -> Vec<GeneratedImage> {
        let shape = pixels.shape();
        let (batch, height, width) = (shape[0], shape[2], shape[3]);
        let plane = height * width;
        let data = pixels.data();

        (0..batch)
            .map(|b| {
                let base = b * 3 * plane;
                let mut rgb = Vec::with_capacity(plane * 3);
                for i in 0..plane {
                    for c in 0..3 {
                        let v = data[base + c * plane + i];
                        rgb.push(((v / 2.0 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8);
                    }
                }
                GeneratedImage {
                    width: width as u32,
                    height: height as u32,
                    pixels: rgb,
                }
            })
            .collect()
    }

    /// Encode as PNG bytes
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut png_data = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut png_data);
        encoder
            .write_image(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("Failed to encode PNG")?;
        Ok(png_data)
    }
}
