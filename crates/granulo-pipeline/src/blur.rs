//! Gaussian blur for noise reduction before thresholding.
//!
//! Smooths the intensity image with a normalized square Gaussian kernel
//! of an odd width, applied separably. The standard deviation is derived
//! from the width using the usual convention for fixed-size kernels:
//! `sigma = 0.3 * ((k - 1) / 2 - 1) + 0.8`.

use image::GrayImage;

/// Standard deviation used for a kernel of width `kernel_size`.
#[must_use]
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)] // kernel widths are small
    let half = (kernel_size.saturating_sub(1)) as f32 * 0.5;
    0.3f32.mul_add(half - 1.0, 0.8)
}

/// Normalized 1-D Gaussian weights for an odd `kernel_size`.
///
/// The weights sum to one, so flat regions keep their intensity.
#[must_use]
pub fn gaussian_kernel(kernel_size: u32) -> Vec<f32> {
    let sigma = sigma_for_kernel(kernel_size);
    let radius = i64::from(kernel_size / 2);
    let denom = 2.0 * sigma * sigma;

    #[allow(clippy::cast_precision_loss)] // |offset| <= radius, tiny
    let raw: Vec<f32> = (-radius..=radius)
        .map(|offset| {
            let d = offset as f32;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Apply Gaussian blur with a square kernel of width `kernel_size`.
///
/// A width of 1 (or less) is the identity and returns a copy. Even
/// widths are rejected upstream by parameter validation.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 {
        return image.clone();
    }

    let kernel = gaussian_kernel(kernel_size);
    imageproc::filter::separable_filter_equal(image, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn kernel_size_one_returns_identical_image() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 1);
        assert_eq!(img, blurred);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, 5);
        assert_eq!(blurred.width(), 17);
        assert_eq!(blurred.height(), 31);
    }

    #[test]
    fn sigma_matches_fixed_kernel_convention() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(5) - 1.1).abs() < 1e-6);
        assert!((sigma_for_kernel(7) - 1.4).abs() < 1e-6);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        for size in [3, 5, 9] {
            let k = gaussian_kernel(size);
            assert_eq!(k.len(), size as usize);
            let sum: f32 = k.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "size {size}: sum {sum}");
            for i in 0..k.len() / 2 {
                assert!((k[i] - k[k.len() - 1 - i]).abs() < 1e-7);
            }
            // Peak at the centre.
            let mid = k.len() / 2;
            assert!(k.iter().all(|&w| w <= k[mid]));
        }
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 5);

        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];

        assert!(
            left_of_edge > 0,
            "expected blur to raise left-of-edge above 0, got {left_of_edge}",
        );
        assert!(
            right_of_edge < 255,
            "expected blur to lower right-of-edge below 255, got {right_of_edge}",
        );
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_fn(10, 10, |_, _| image::Luma([128]));
        let blurred = gaussian_blur(&img, 7);
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(
                diff.abs() <= 1,
                "expected uniform image to stay near 128 after blur, got {}",
                pixel.0[0],
            );
        }
    }
}
