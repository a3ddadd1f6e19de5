//! Image decoding and intensity conversion.
//!
//! Turns a caller-supplied [`RasterImage`] (1, 2, 3 or 4 interleaved
//! channels) into a single-channel intensity image suitable for the
//! segmentation pipeline. Alpha is ignored.
//!
//! This is the first step in the pipeline: raster in, `GrayImage` out.

use image::{DynamicImage, GrayImage, ImageBuffer};

use crate::types::{AnalysisError, RasterImage};

/// Check that a raster has non-zero area and a supported channel layout.
///
/// # Errors
///
/// Returns [`AnalysisError::UnsupportedImage`] describing the problem.
pub fn validate(raster: &RasterImage) -> Result<(), AnalysisError> {
    if raster.is_empty() {
        return Err(AnalysisError::unsupported_image(format!(
            "image has zero area ({}x{})",
            raster.width(),
            raster.height(),
        )));
    }
    if !RasterImage::SUPPORTED_CHANNELS.contains(&raster.channels()) {
        return Err(AnalysisError::unsupported_image(format!(
            "{} channel(s) per pixel; expected one of {:?}",
            raster.channels(),
            RasterImage::SUPPORTED_CHANNELS,
        )));
    }
    Ok(())
}

/// Convert a raster to single-channel intensity.
///
/// Luma inputs are copied as-is. Colour inputs go through the `image`
/// crate's weighted luminance conversion, so green contributes most and
/// blue least.
///
/// # Errors
///
/// Returns [`AnalysisError::UnsupportedImage`] if [`validate`] rejects
/// the raster.
pub fn to_intensity(raster: &RasterImage) -> Result<GrayImage, AnalysisError> {
    validate(raster)?;

    let (w, h) = (raster.width(), raster.height());
    let pixels = raster.pixels().to_vec();
    let dynamic = match raster.channels() {
        1 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        4 => ImageBuffer::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
        _ => None,
    };

    let dynamic = dynamic.ok_or_else(|| {
        AnalysisError::unsupported_image("pixel buffer does not match the declared dimensions")
    })?;

    match dynamic {
        DynamicImage::ImageLuma8(gray) => Ok(gray),
        other => Ok(other.to_luma8()),
    }
}

/// Decode encoded image bytes (PNG, JPEG, BMP, WebP) into a raster.
///
/// # Errors
///
/// Returns [`AnalysisError::UnsupportedImage`] if `bytes` is empty or
/// the format is unrecognized or corrupt.
pub fn decode(bytes: &[u8]) -> Result<RasterImage, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::unsupported_image("no image data provided"));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::unsupported_image(format!("failed to decode image: {e}")))?;
    Ok(RasterImage::from_dynamic(&img))
}
