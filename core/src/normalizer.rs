//! Floor-plan normalization: trim the white border of an image and center
//! it on a white canvas matching another image's size.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("target canvas {width}x{height} is empty")]
    EmptyCanvas { width: u32, height: u32 },
}

/// The image capability the Portfolio Store depends on.
pub trait ImageNormalizer: Send + Sync {
    /// `(width, height)` of the image at `path`.
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), NormalizeError>;

    /// Rewrite the image at `path` in place so it is exactly `canvas` sized.
    fn normalize(&self, path: &Path, canvas: (u32, u32)) -> Result<(), NormalizeError>;
}

/// [`ImageNormalizer`] backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateNormalizer {
    /// Pixels with every channel at or above this value count as background.
    pub white_threshold: u8,
}

impl Default for ImageCrateNormalizer {
    fn default() -> Self {
        Self {
            white_threshold: 245,
        }
    }
}

impl ImageNormalizer for ImageCrateNormalizer {
    fn dimensions(&self, path: &Path) -> Result<(u32, u32), NormalizeError> {
        Ok(image::image_dimensions(path)?)
    }

    fn normalize(&self, path: &Path, canvas: (u32, u32)) -> Result<(), NormalizeError> {
        let (width, height) = canvas;
        if width == 0 || height == 0 {
            return Err(NormalizeError::EmptyCanvas { width, height });
        }

        let source = image::open(path)?.to_rgb8();
        let trimmed = match content_bounds(&source, self.white_threshold) {
            Some((x, y, w, h)) => imageops::crop_imm(&source, x, y, w, h).to_image(),
            None => source,
        };

        let (fit_w, fit_h) = fit_within(trimmed.dimensions(), canvas);
        let resized = imageops::resize(&trimmed, fit_w, fit_h, FilterType::Lanczos3);

        let mut output = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let x = i64::from((width - fit_w) / 2);
        let y = i64::from((height - fit_h) / 2);
        imageops::overlay(&mut output, &resized, x, y);

        output.save(path)?;
        tracing::debug!(
            "normalized {} onto a {width}x{height} canvas",
            path.display()
        );
        Ok(())
    }
}

/// Bounding box `(x, y, w, h)` of non-background pixels, or `None` when the
/// whole image is background.
fn content_bounds(image: &RgbImage, threshold: u8) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0.iter().all(|&channel| channel >= threshold) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((min_x, min_y, max_x, max_y)) => {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            }
        });
    }
    bounds.map(|(min_x, min_y, max_x, max_y)| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Largest size with the source aspect ratio that fits inside `canvas`.
fn fit_within(source: (u32, u32), canvas: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (f64::from(source.0.max(1)), f64::from(source.1.max(1)));
    let (cw, ch) = (f64::from(canvas.0), f64::from(canvas.1));
    let scale = (cw / sw).min(ch / sh);
    let w = ((sw * scale).round() as u32).clamp(1, canvas.0);
    let h = ((sh * scale).round() as u32).clamp(1, canvas.1);
    (w, h)
}
