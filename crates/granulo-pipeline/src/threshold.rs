//! Automatic global binarization with Otsu's method.

use image::{GrayImage, Luma};

use crate::types::Polarity;

/// Foreground value in a binary mask.
pub const FOREGROUND: u8 = 255;
/// Background value in a binary mask.
pub const BACKGROUND: u8 = 0;

/// Result of [`binarize`].
#[derive(Debug, Clone)]
pub struct Binarized {
    /// The level chosen by Otsu's method.
    pub level: u8,
    /// [`FOREGROUND`] / [`BACKGROUND`] mask, same size as the input.
    pub mask: GrayImage,
    /// Number of foreground pixels.
    pub foreground_pixels: usize,
}

/// Binarize `image` at the level that maximizes between-class variance.
///
/// With [`Polarity::BrightOnDark`] pixels strictly above the level are
/// foreground; with [`Polarity::DarkOnBright`] pixels at or below it are.
/// A uniform image yields level 0; under the default polarity it then
/// has no foreground at all.
#[must_use = "returns the binary mask"]
pub fn binarize(image: &GrayImage, polarity: Polarity) -> Binarized {
    let level = imageproc::contrast::otsu_level(image);
    let mut foreground_pixels = 0usize;

    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0[0];
        let is_fg = match polarity {
            Polarity::BrightOnDark => p > level,
            Polarity::DarkOnBright => p <= level,
        };
        if is_fg {
            foreground_pixels += 1;
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    });

    Binarized {
        level,
        mask,
        foreground_pixels,
    }
}
