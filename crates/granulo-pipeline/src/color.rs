//! Colour segmentation: HSV range masks instead of intensity edges.
//!
//! Pixels are converted to 8-bit HSV on the half-degree hue scale (hue
//! `0..=180`, saturation and value `0..=255`) and kept when they fall in
//! any configured [`HsvRange`](crate::types::HsvRange). The mask is closed
//! then opened with a square element and traced like an edge map. Luma
//! rasters have zero saturation everywhere, so only ranges with a
//! saturation floor of 0 can match them.

use std::time::Instant;

use image::{GrayImage, Luma};

use crate::cancel::CancellationToken;
use crate::diagnostics::StageMetrics;
use crate::grayscale;
use crate::morphology;
use crate::segment::{RunOutput, Segmentation, Segmenter, filter_stage, timed, trace_stage};
use crate::types::{AnalysisError, HsvRange, RasterImage, SegmentationParameters, Stage};

/// Convert one RGB pixel to `[h, s, v]`.
///
/// Hue is halved to fit a byte; grey pixels get hue 0.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::many_single_char_names
)]
pub fn to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    if v == min {
        return [0, 0, v];
    }
    let diff = f32::from(v - min);
    let s = (255.0 * diff / f32::from(v)).round() as u8;
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let degrees = if v == r {
        60.0 * (gf - bf) / diff
    } else if v == g {
        60.0f32.mul_add((bf - rf) / diff, 120.0)
    } else {
        60.0f32.mul_add((rf - gf) / diff, 240.0)
    };
    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
    let h = (degrees / 2.0).round().min(f32::from(HsvRange::MAX_HUE)) as u8;
    [h, s, v]
}

/// RGB of pixel `i`. Luma layouts repeat the single channel; alpha is
/// ignored.
fn rgb_at(raster: &RasterImage, i: usize) -> [u8; 3] {
    let channels = usize::from(raster.channels());
    let px = &raster.pixels()[i * channels..(i + 1) * channels];
    match px {
        [l] | [l, _] => [*l, *l, *l],
        [r, g, b, ..] => [*r, *g, *b],
        [] => [0, 0, 0],
    }
}

/// HSV of every pixel in raster order.
///
/// The raster must already have passed [`grayscale::validate`].
fn hsv_pixels(raster: &RasterImage) -> impl Iterator<Item = [u8; 3]> + '_ {
    let n = usize::try_from(raster.pixel_count()).unwrap_or(0);
    (0..n).map(move |i| to_hsv(rgb_at(raster, i)))
}

/// Whole-image colour statistics used to pick a strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvStatistics {
    /// Mean saturation, `0..=255`.
    pub mean_saturation: f64,
    /// Population variance of the half-degree hue.
    pub hue_variance: f64,
}

/// Mean saturation and hue variance over every pixel.
///
/// An empty raster reports zeros.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn hsv_statistics(raster: &RasterImage) -> HsvStatistics {
    let (mut n, mut sat_sum, mut hue_sum, mut hue_sq) = (0u64, 0.0, 0.0, 0.0);
    for [h, s, _] in hsv_pixels(raster) {
        n += 1;
        sat_sum += f64::from(s);
        hue_sum += f64::from(h);
        hue_sq += f64::from(h) * f64::from(h);
    }
    if n == 0 {
        return HsvStatistics {
            mean_saturation: 0.0,
            hue_variance: 0.0,
        };
    }
    let n = n as f64;
    let hue_mean = hue_sum / n;
    HsvStatistics {
        mean_saturation: sat_sum / n,
        hue_variance: hue_mean.mul_add(-hue_mean, hue_sq / n).max(0.0),
    }
}

/// Binary mask (255 = inside any range) and its set-pixel count.
#[must_use]
pub fn color_mask(raster: &RasterImage, ranges: &[HsvRange]) -> (GrayImage, usize) {
    let mut matched = 0usize;
    let data: Vec<u8> = hsv_pixels(raster)
        .map(|hsv| {
            if ranges.iter().any(|r| r.contains(hsv)) {
                matched += 1;
                255
            } else {
                0
            }
        })
        .collect();
    let mask = GrayImage::from_raw(raster.width(), raster.height(), data)
        .unwrap_or_else(|| GrayImage::from_pixel(raster.width(), raster.height(), Luma([0])));
    (mask, matched)
}

/// Confidence of a colour run: ten times the masked share of the image,
/// capped at 1. A run that keeps no contours has none.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn color_confidence(contour_count: usize, mask_pixels: usize, total_pixels: u64) -> f64 {
    if contour_count == 0 || total_pixels == 0 {
        return 0.0;
    }
    (mask_pixels as f64 / total_pixels as f64 * 10.0).min(1.0)
}

/// Segments stones by colour: HSV ranges → closing + opening → outer
/// contours → area filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorSegmenter;

impl ColorSegmenter {
    /// A colour segmenter following `params.color`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Segmenter for ColorSegmenter {
    fn fingerprint(&self) -> String {
        "color".to_owned()
    }

    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError> {
        params.validate()?;
        grayscale::validate(image)?;

        let started = Instant::now();
        let ranges = &params.color.ranges;

        cancel.check(Stage::ColorMask)?;
        let ((mask, _), mask_diag) = timed(
            Stage::ColorMask,
            || color_mask(image, ranges),
            |(_, matched)| StageMetrics::ColorMask {
                ranges: ranges.len(),
                matched_pixels: *matched,
                total_pixels: image.pixel_count(),
            },
        );

        cancel.check(Stage::Morphology)?;
        let width = params.color.morphology_kernel_size;
        let pixels_before = morphology::count_set(&mask);
        let (cleaned, morphology_diag) = timed(
            Stage::Morphology,
            || morphology::open(&morphology::close(&mask, width), width),
            |m| StageMetrics::Morphology {
                kernel_size: width,
                opened: true,
                pixels_before,
                pixels_after: morphology::count_set(m),
            },
        );
        let mask_pixels = morphology::count_set(&cleaned);

        cancel.check(Stage::ContourExtraction)?;
        let (traced, contour_diag) = trace_stage(params.contour_tracer, &cleaned);
        let traced = traced?;

        cancel.check(Stage::Filtering)?;
        let ((contours, rejected), filter_diag) = filter_stage(traced.outer, params);

        Ok(RunOutput {
            label: self.fingerprint(),
            stages: vec![mask_diag, morphology_diag, contour_diag, filter_diag],
            started,
            confidence: color_confidence(contours.len(), mask_pixels, image.pixel_count()),
            contours,
            rejected,
        }
        .finish(image))
    }
}
