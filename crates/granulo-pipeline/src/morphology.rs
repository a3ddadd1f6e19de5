//! Binary closing and opening with square structuring elements.
//!
//! Thin wrappers over `imageproc::morphology` taking the element's width
//! in pixels (odd, `1` = identity) instead of a radius. Any non-zero pixel
//! is set. Pixels beyond the image are neither set nor background, so
//! nothing erodes inward from the frame.

use image::GrayImage;
use imageproc::distance_transform::Norm;

use crate::types::structuring_radius;

/// Dilate then erode: fills gaps and notches narrower than `width`.
#[must_use]
pub fn close(mask: &GrayImage, width: u32) -> GrayImage {
    if width <= 1 {
        return mask.clone();
    }
    imageproc::morphology::close(mask, Norm::LInf, structuring_radius(width))
}

/// Erode then dilate: removes specks and bridges narrower than `width`.
#[must_use]
pub fn open(mask: &GrayImage, width: u32) -> GrayImage {
    if width <= 1 {
        return mask.clone();
    }
    imageproc::morphology::open(mask, Norm::LInf, structuring_radius(width))
}

/// Number of set pixels.
#[must_use]
pub fn count_set(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] != 0).count()
}
