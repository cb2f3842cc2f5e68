//! SIMD-accelerated downscaling with fast_image_resize.

use crate::error::DeriveError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::RgbImage;
use std::path::Path;

/// At or below this long edge, bilinear is indistinguishable from Lanczos
const BILINEAR_MAX_EDGE: u32 = 512;

/// Dimensions that fit within `max_long_edge`, preserving aspect ratio.
///
/// Never enlarges; returns the input size when it already fits.
pub fn target_dimensions(width: u32, height: u32, max_long_edge: u32) -> (u32, u32) {
    let long_edge = width.max(height);
    if long_edge <= max_long_edge || long_edge == 0 {
        return (width, height);
    }
    let scale = max_long_edge as f64 / long_edge as f64;
    let scaled = |edge: u32| ((edge as f64 * scale).round() as u32).max(1);
    if width >= height {
        (max_long_edge, scaled(height))
    } else {
        (scaled(width), max_long_edge)
    }
}

/// Reusable resizer; one per derivation worker
pub struct FastResizer {
    resizer: Resizer,
}

impl FastResizer {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
        }
    }

    /// Shrink `image` so its long edge is at most `max_long_edge`
    pub fn fit_within(
        &mut self,
        image: &RgbImage,
        max_long_edge: u32,
        path: &Path,
    ) -> Result<RgbImage, DeriveError> {
        let (src_width, src_height) = image.dimensions();
        if src_width == 0 || src_height == 0 {
            return Err(DeriveError::InvalidDimensions {
                path: path.to_path_buf(),
            });
        }

        let (width, height) = target_dimensions(src_width, src_height, max_long_edge);
        if (width, height) == (src_width, src_height) {
            return Ok(image.clone());
        }

        let resize_err = |reason: String| DeriveError::Encode {
            path: path.to_path_buf(),
            reason,
        };

        let src_image = Image::from_vec_u8(src_width, src_height, image.as_raw().clone(), PixelType::U8x3)
            .map_err(|e| resize_err(format!("Failed to create source image: {}", e)))?;
        let mut dst_image = Image::new(width, height, PixelType::U8x3);

        let filter = if max_long_edge <= BILINEAR_MAX_EDGE {
            FilterType::Bilinear
        } else {
            FilterType::Lanczos3
        };
        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(filter));

        self.resizer
            .resize(&src_image, &mut dst_image, &options)
            .map_err(|e| resize_err(format!("Resize failed: {}", e)))?;

        RgbImage::from_raw(width, height, dst_image.into_vec())
            .ok_or_else(|| resize_err("Failed to create result buffer".to_string()))
    }
}

impl Default for FastResizer {
    fn default() -> Self {
        Self::new()
    }
}
