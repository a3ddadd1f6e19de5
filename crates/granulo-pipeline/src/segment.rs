//! Segmentation: raster image + parameters → filtered particle contours.
//!
//! [`Segmenter`] is the capability the rest of the crate depends on. The
//! classical implementation runs seven fixed stages:
//!
//! 1. intensity conversion
//! 2. Gaussian blur (skipped for a kernel width of 1)
//! 3. Otsu binarization
//! 4. hysteresis edge extraction
//! 5. edge-map closing (skipped for a kernel width of 1)
//! 6. outer contour tracing
//! 7. inclusive area filtering
//!
//! [`ColorSegmenter`](crate::color::ColorSegmenter) replaces stages 1-5
//! with an HSV colour mask. [`FallbackSegmenter`], [`HybridSegmenter`]
//! and [`AutoSegmenter`] compose strategies.
//!
//! Parameters and image layout are validated before the first stage. The
//! cancellation token is consulted before stage 1 and between stages.

use std::time::Instant;

use crate::blur;
use crate::cancel::CancellationToken;
use crate::color::{self, ColorSegmenter, HsvStatistics};
use crate::contour::{ContourTracer, ContourTracerKind, TracedContours};
use crate::diagnostics::{
    SegmentationDiagnostics, SegmentationSummary, StageDiagnostics, StageMetrics, point_stats,
};
use crate::edge;
use crate::geometry;
use crate::grayscale;
use crate::morphology;
use crate::threshold;
use crate::types::{
    AnalysisError, Contour, Dimensions, GrayImage, Polarity, RasterImage, RejectionCounts,
    SegmentationParameters, Stage,
};

/// Contours produced by a [`Segmenter`].
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Source image dimensions.
    pub dimensions: Dimensions,
    /// Contours whose area lies inside the configured window.
    pub contours: Vec<Contour>,
    /// Contours dropped by the area filter or duplicate suppression.
    pub rejected: RejectionCounts,
    /// How much the strategy trusts this result, in `0.0..=1.0`.
    pub confidence: f64,
    /// One entry per strategy run that contributed.
    pub diagnostics: Vec<SegmentationDiagnostics>,
}

impl Segmentation {
    /// All contours dropped so far.
    #[must_use]
    pub const fn rejected_count(&self) -> usize {
        self.rejected.total()
    }
}

/// A segmentation strategy.
///
/// Implementations must be deterministic: the same image and parameters
/// always give the same contours. Cached results are keyed on
/// [`fingerprint`](Self::fingerprint), so two strategies that can
/// disagree must report different fingerprints.
pub trait Segmenter: Send + Sync {
    /// Stable identity of this strategy and its own settings.
    fn fingerprint(&self) -> String;

    /// Segment `image` into particle contours.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::InvalidParameters`] if `params` fail validation.
    /// - [`AnalysisError::UnsupportedImage`] for empty or unsupported
    ///   rasters.
    /// - [`AnalysisError::Cancelled`] if `cancel` fires between stages.
    /// - [`AnalysisError::ComputationFailure`] on internal failures.
    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError>;
}

/// Segment with the default [`ClassicalSegmenter`] and no cancellation.
///
/// # Errors
///
/// See [`Segmenter::segment`].
pub fn segment(
    image: &RasterImage,
    params: &SegmentationParameters,
) -> Result<Segmentation, AnalysisError> {
    ClassicalSegmenter::default().segment(image, params, &CancellationToken::new())
}

/// The blur → Otsu → hysteresis → outer contour pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassicalSegmenter {
    polarity: Option<Polarity>,
}

impl ClassicalSegmenter {
    /// A segmenter that follows `params.polarity`.
    #[must_use]
    pub const fn new() -> Self {
        Self { polarity: None }
    }

    /// A segmenter that always uses `polarity`, whatever the parameters
    /// say. Useful as the second half of a [`FallbackSegmenter`].
    #[must_use]
    pub const fn with_polarity(polarity: Polarity) -> Self {
        Self {
            polarity: Some(polarity),
        }
    }

    fn label(&self) -> String {
        match self.polarity {
            None => "classical".to_owned(),
            Some(p) => format!("classical[{p:?}]"),
        }
    }
}

/// Time one stage, returning its output and its diagnostics.
pub(crate) fn timed<T>(
    stage: Stage,
    run: impl FnOnce() -> T,
    metrics: impl FnOnce(&T) -> StageMetrics,
) -> (T, StageDiagnostics) {
    let start = Instant::now();
    let out = run();
    let duration = start.elapsed();
    let metrics = metrics(&out);
    (
        out,
        StageDiagnostics {
            stage,
            duration,
            metrics,
        },
    )
}

/// Trace outer contours of `map` as a timed stage.
pub(crate) fn trace_stage(
    tracer: ContourTracerKind,
    map: &GrayImage,
) -> (Result<TracedContours, AnalysisError>, StageDiagnostics) {
    timed(
        Stage::ContourExtraction,
        || tracer.trace(map),
        |t| {
            let (outer, nested) = t.as_ref().map_or((&[][..], 0), |t| (&t.outer[..], t.nested));
            let (total_point_count, mean_contour_points) = point_stats(outer);
            StageMetrics::ContourExtraction {
                tracer: format!("{tracer:?}"),
                contour_count: outer.len(),
                nested_count: nested,
                total_point_count,
                mean_contour_points,
            }
        },
    )
}

/// Apply the inclusive area window as a timed stage.
pub(crate) fn filter_stage(
    contours: Vec<Contour>,
    params: &SegmentationParameters,
) -> ((Vec<Contour>, RejectionCounts), StageDiagnostics) {
    timed(
        Stage::Filtering,
        || filter_by_area(contours, params.min_contour_area, params.max_contour_area),
        |(kept, rejected)| StageMetrics::Filtering {
            min_area: params.min_contour_area,
            max_area: params.max_contour_area,
            accepted: kept.len(),
            below_min: rejected.below_min_area,
            above_max: rejected.above_max_area,
        },
    )
}

/// Everything one strategy run produced, before it becomes a
/// [`Segmentation`].
pub(crate) struct RunOutput {
    pub(crate) label: String,
    pub(crate) stages: Vec<StageDiagnostics>,
    pub(crate) started: Instant,
    pub(crate) contours: Vec<Contour>,
    pub(crate) rejected: RejectionCounts,
    pub(crate) confidence: f64,
}

impl RunOutput {
    /// Log the run and wrap it with its diagnostics.
    pub(crate) fn finish(self, image: &RasterImage) -> Segmentation {
        let total_duration = self.started.elapsed();
        log::debug!(
            "{}: {} contour(s) accepted, {} rejected, confidence {:.2} in {:.3}ms",
            self.label,
            self.contours.len(),
            self.rejected.total(),
            self.confidence,
            total_duration.as_secs_f64() * 1000.0,
        );

        let diagnostics = SegmentationDiagnostics {
            strategy: self.label,
            stages: self.stages,
            total_duration,
            summary: SegmentationSummary {
                image_width: image.width(),
                image_height: image.height(),
                pixel_count: image.pixel_count(),
                accepted: self.contours.len(),
                rejected: self.rejected.total(),
            },
        };

        Segmentation {
            dimensions: image.dimensions(),
            contours: self.contours,
            rejected: self.rejected,
            confidence: self.confidence,
            diagnostics: vec![diagnostics],
        }
    }
}

/// Confidence of an edge-based run: saturates at twenty particles.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edge_confidence(contour_count: usize) -> f64 {
    (contour_count as f64 / 20.0).min(1.0)
}

impl Segmenter for ClassicalSegmenter {
    fn fingerprint(&self) -> String {
        self.label()
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
        let polarity = self.polarity.unwrap_or(params.polarity);

        cancel.check(Stage::Grayscale)?;
        let (gray, grayscale_diag) = timed(
            Stage::Grayscale,
            || grayscale::to_intensity(image),
            |_| StageMetrics::Grayscale {
                width: image.width(),
                height: image.height(),
                channels: image.channels(),
            },
        );
        let gray = gray?;

        cancel.check(Stage::Blur)?;
        let kernel_size = params.blur_kernel_size;
        let (smoothed, blur_diag) = timed(
            Stage::Blur,
            || blur::gaussian_blur(&gray, kernel_size),
            |_| StageMetrics::Blur {
                kernel_size,
                sigma: if kernel_size > 1 {
                    blur::sigma_for_kernel(kernel_size)
                } else {
                    0.0
                },
            },
        );

        cancel.check(Stage::Threshold)?;
        let (binary, threshold_diag) = timed(
            Stage::Threshold,
            || threshold::binarize(&smoothed, polarity),
            |b| StageMetrics::Threshold {
                level: b.level,
                foreground_pixels: b.foreground_pixels,
                total_pixels: image.pixel_count(),
            },
        );

        cancel.check(Stage::EdgeDetection)?;
        let (edges, edge_diag) = timed(
            Stage::EdgeDetection,
            || {
                edge::detect_edges(
                    &smoothed,
                    &binary.mask,
                    params.edge_low_threshold,
                    params.edge_high_threshold,
                )
            },
            |e| StageMetrics::EdgeDetection {
                low_threshold: params.edge_low_threshold,
                high_threshold: params.edge_high_threshold,
                candidates: e.candidates,
                strong: e.strong,
                promoted: e.promoted,
            },
        );

        cancel.check(Stage::Morphology)?;
        let closing = params.morphology_kernel_size;
        let (closed, morphology_diag) = timed(
            Stage::Morphology,
            || morphology::close(&edges.edges, closing),
            |m| StageMetrics::Morphology {
                kernel_size: closing,
                opened: false,
                pixels_before: edges.edge_pixels(),
                pixels_after: morphology::count_set(m),
            },
        );

        cancel.check(Stage::ContourExtraction)?;
        let (traced, contour_diag) = trace_stage(params.contour_tracer, &closed);
        let traced = traced?;

        cancel.check(Stage::Filtering)?;
        let ((contours, rejected), filter_diag) = filter_stage(traced.outer, params);

        Ok(RunOutput {
            label: self.label(),
            stages: vec![
                grayscale_diag,
                blur_diag,
                threshold_diag,
                edge_diag,
                morphology_diag,
                contour_diag,
                filter_diag,
            ],
            started,
            confidence: edge_confidence(contours.len()),
            contours,
            rejected,
        }
        .finish(image))
    }
}

/// Keep contours with `min <= area <= max`, counting the rest.
#[must_use]
pub fn filter_by_area(contours: Vec<Contour>, min: f64, max: f64) -> (Vec<Contour>, RejectionCounts) {
    let mut rejected = RejectionCounts::default();
    let kept = contours
        .into_iter()
        .filter(|c| {
            let area = geometry::area(c);
            if area < min {
                rejected.below_min_area += 1;
                false
            } else if area > max {
                rejected.above_max_area += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept, rejected)
}

// ───────────────────────── Fallback composition ──────────────────────

/// When two contours count as the same particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateTolerance {
    /// Largest area difference, as a fraction of the larger area.
    pub area_fraction: f64,
    /// Centroids must be strictly closer than this (pixels).
    pub max_centroid_distance: f64,
}

impl DuplicateTolerance {
    /// Default relative area tolerance.
    pub const DEFAULT_AREA_FRACTION: f64 = 0.1;
    /// Default centroid distance in pixels.
    pub const DEFAULT_MAX_CENTROID_DISTANCE: f64 = 20.0;

    /// Returns `true` if `a` and `b` describe the same particle.
    ///
    /// Contours enclosing no area are never duplicates.
    #[must_use]
    pub fn is_duplicate(&self, a: &Contour, b: &Contour) -> bool {
        let (area_a, area_b) = (geometry::area(a), geometry::area(b));
        if area_a <= 0.0 || area_b <= 0.0 {
            return false;
        }
        if (area_a - area_b).abs() / area_a.max(area_b).max(1.0) > self.area_fraction {
            return false;
        }
        match (geometry::centroid(a), geometry::centroid(b)) {
            (Some(ca), Some(cb)) => ca.distance(cb) < self.max_centroid_distance,
            _ => false,
        }
    }
}

impl Default for DuplicateTolerance {
    fn default() -> Self {
        Self {
            area_fraction: Self::DEFAULT_AREA_FRACTION,
            max_centroid_distance: Self::DEFAULT_MAX_CENTROID_DISTANCE,
        }
    }
}

/// Drop every contour that duplicates an earlier one.
///
/// Returns the survivors in their original order and the number dropped.
#[must_use]
pub fn suppress_duplicates(
    contours: Vec<Contour>,
    tolerance: &DuplicateTolerance,
) -> (Vec<Contour>, usize) {
    let mut unique: Vec<Contour> = Vec::with_capacity(contours.len());
    let mut dropped = 0;
    for contour in contours {
        if unique.iter().any(|u| tolerance.is_duplicate(&contour, u)) {
            dropped += 1;
        } else {
            unique.push(contour);
        }
    }
    (unique, dropped)
}

/// Runs `primary`, and only when it finds too few particles also runs
/// `fallback`, merging both contour sets without duplicates.
#[derive(Debug, Clone)]
pub struct FallbackSegmenter<P, F> {
    primary: P,
    fallback: F,
    min_primary_contours: usize,
    tolerance: DuplicateTolerance,
}

impl<P: Segmenter, F: Segmenter> FallbackSegmenter<P, F> {
    /// Default contour count below which the fallback runs.
    pub const DEFAULT_MIN_PRIMARY_CONTOURS: usize = 2;

    /// Compose two strategies with default settings.
    #[must_use]
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            min_primary_contours: Self::DEFAULT_MIN_PRIMARY_CONTOURS,
            tolerance: DuplicateTolerance::default(),
        }
    }

    /// Run the fallback when the primary finds fewer than `count` contours.
    #[must_use]
    pub const fn with_min_primary_contours(mut self, count: usize) -> Self {
        self.min_primary_contours = count;
        self
    }

    /// Replace the duplicate tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: DuplicateTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl<P: Segmenter, F: Segmenter> Segmenter for FallbackSegmenter<P, F> {
    fn fingerprint(&self) -> String {
        format!(
            "fallback(primary={}, fallback={}, min={}, area_fraction={}, distance={})",
            self.primary.fingerprint(),
            self.fallback.fingerprint(),
            self.min_primary_contours,
            self.tolerance.area_fraction,
            self.tolerance.max_centroid_distance,
        )
    }

    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError> {
        let primary = self.primary.segment(image, params, cancel)?;
        if primary.contours.len() >= self.min_primary_contours {
            return Ok(primary);
        }

        log::debug!(
            "primary strategy found {} contour(s) (< {}), running fallback",
            primary.contours.len(),
            self.min_primary_contours,
        );
        let fallback = self.fallback.segment(image, params, cancel)?;
        Ok(merge(primary, fallback, &self.tolerance))
    }
}

/// Append `secondary`'s contours to `primary`'s, dropping duplicates.
///
/// The merged result keeps the primary's confidence and counts both
/// runs' rejections.
fn merge(primary: Segmentation, secondary: Segmentation, tolerance: &DuplicateTolerance) -> Segmentation {
    let mut merged = primary.contours;
    merged.extend(secondary.contours);
    let (contours, duplicates) = suppress_duplicates(merged, tolerance);

    let rejected = RejectionCounts {
        below_min_area: primary.rejected.below_min_area + secondary.rejected.below_min_area,
        above_max_area: primary.rejected.above_max_area + secondary.rejected.above_max_area,
        duplicates: primary.rejected.duplicates + secondary.rejected.duplicates + duplicates,
        degenerate: 0,
    };

    let mut diagnostics = primary.diagnostics;
    diagnostics.extend(secondary.diagnostics);

    Segmentation {
        dimensions: primary.dimensions,
        contours,
        rejected,
        confidence: primary.confidence,
        diagnostics,
    }
}

// ───────────────────────── Hybrid composition ────────────────────────

/// Runs an edge strategy and a colour strategy, keeps the more confident
/// result, and tops it up from the other when it finds too few
/// particles.
///
/// Ties go to the edge strategy.
#[derive(Debug, Clone)]
pub struct HybridSegmenter<E = ClassicalSegmenter, C = ColorSegmenter> {
    edge: E,
    color: C,
    min_primary_contours: usize,
    tolerance: DuplicateTolerance,
}

impl Default for HybridSegmenter {
    fn default() -> Self {
        Self::new(ClassicalSegmenter::new(), ColorSegmenter::new())
    }
}

impl<E: Segmenter, C: Segmenter> HybridSegmenter<E, C> {
    /// Default contour count below which the other result is merged in.
    pub const DEFAULT_MIN_PRIMARY_CONTOURS: usize = 2;

    /// Combine an edge and a colour strategy with default settings.
    #[must_use]
    pub fn new(edge: E, color: C) -> Self {
        Self {
            edge,
            color,
            min_primary_contours: Self::DEFAULT_MIN_PRIMARY_CONTOURS,
            tolerance: DuplicateTolerance::default(),
        }
    }

    /// Merge when the chosen result has fewer than `count` contours.
    #[must_use]
    pub const fn with_min_primary_contours(mut self, count: usize) -> Self {
        self.min_primary_contours = count;
        self
    }

    /// Replace the duplicate tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: DuplicateTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl<E: Segmenter, C: Segmenter> Segmenter for HybridSegmenter<E, C> {
    fn fingerprint(&self) -> String {
        format!(
            "hybrid(edge={}, color={}, min={}, area_fraction={}, distance={})",
            self.edge.fingerprint(),
            self.color.fingerprint(),
            self.min_primary_contours,
            self.tolerance.area_fraction,
            self.tolerance.max_centroid_distance,
        )
    }

    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError> {
        let edge = self.edge.segment(image, params, cancel)?;
        let color = self.color.segment(image, params, cancel)?;

        let (primary, secondary) = if color.confidence > edge.confidence {
            (color, edge)
        } else {
            (edge, color)
        };
        log::debug!(
            "hybrid: keeping result with confidence {:.2} over {:.2}",
            primary.confidence,
            secondary.confidence,
        );

        if primary.contours.len() >= self.min_primary_contours || secondary.contours.is_empty() {
            let mut chosen = primary;
            chosen.diagnostics.extend(secondary.diagnostics);
            return Ok(chosen);
        }
        Ok(merge(primary, secondary, &self.tolerance))
    }
}

// ───────────────────────── Automatic selection ───────────────────────

/// Which strategy [`AutoSegmenter`] picked for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyChoice {
    /// Intensity edges only: the image is nearly grey.
    Edge,
    /// Colour ranges only: the image is saturated and varied in hue.
    Color,
    /// Both, through [`HybridSegmenter`].
    Hybrid,
}

impl StrategyChoice {
    /// Mean saturation above which colour segmentation is considered.
    pub const COLOR_MIN_MEAN_SATURATION: f64 = 50.0;
    /// Hue variance above which colour segmentation is considered.
    pub const COLOR_MIN_HUE_VARIANCE: f64 = 200.0;
    /// Mean saturation below which only edges are used.
    pub const EDGE_MAX_MEAN_SATURATION: f64 = 30.0;

    /// Pick a strategy from whole-image HSV statistics.
    #[must_use]
    pub fn select(stats: &HsvStatistics) -> Self {
        if stats.mean_saturation > Self::COLOR_MIN_MEAN_SATURATION
            && stats.hue_variance > Self::COLOR_MIN_HUE_VARIANCE
        {
            Self::Color
        } else if stats.mean_saturation < Self::EDGE_MAX_MEAN_SATURATION {
            Self::Edge
        } else {
            Self::Hybrid
        }
    }
}

/// Chooses edge, colour or hybrid segmentation per image from its
/// saturation and hue spread.
#[derive(Debug, Clone, Default)]
pub struct AutoSegmenter {
    edge: ClassicalSegmenter,
    color: ColorSegmenter,
    hybrid: HybridSegmenter,
}

impl AutoSegmenter {
    /// An automatic segmenter with default strategies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The strategy this segmenter would use for `image`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::UnsupportedImage`] for empty or
    /// unsupported rasters.
    pub fn choose(&self, image: &RasterImage) -> Result<StrategyChoice, AnalysisError> {
        grayscale::validate(image)?;
        let stats = color::hsv_statistics(image);
        let choice = StrategyChoice::select(&stats);
        log::info!(
            "auto: mean saturation {:.1}, hue variance {:.1} -> {choice:?}",
            stats.mean_saturation,
            stats.hue_variance,
        );
        Ok(choice)
    }
}

impl Segmenter for AutoSegmenter {
    fn fingerprint(&self) -> String {
        format!(
            "auto(edge={}, color={}, hybrid={})",
            self.edge.fingerprint(),
            self.color.fingerprint(),
            self.hybrid.fingerprint(),
        )
    }

    fn segment(
        &self,
        image: &RasterImage,
        params: &SegmentationParameters,
        cancel: &CancellationToken,
    ) -> Result<Segmentation, AnalysisError> {
        params.validate()?;
        let choice = self.choose(image)?;
        match choice {
            StrategyChoice::Edge => self.edge.segment(image, params, cancel),
            StrategyChoice::Color => self.color.segment(image, params, cancel),
            StrategyChoice::Hybrid => self.hybrid.segment(image, params, cancel),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Point;

    /// Gray raster with bright filled discs `(cx, cy, r)` on black.
    fn discs(w: u32, h: u32, spec: &[(i32, i32, i32)]) -> RasterImage {
        let mut pixels = vec![0u8; (w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                #[allow(clippy::cast_possible_wrap)]
                let (xi, yi) = (x as i32, y as i32);
                if spec
                    .iter()
                    .any(|&(cx, cy, r)| (xi - cx).pow(2) + (yi - cy).pow(2) <= r * r)
                {
                    pixels[(y * w + x) as usize] = 220;
                }
            }
        }
        RasterImage::new(w, h, 1, pixels).unwrap()
    }

    fn unfiltered() -> SegmentationParameters {
        SegmentationParameters {
            min_contour_area: 0.0,
            max_contour_area: 1e9,
            blur_kernel_size: 1,
            ..SegmentationParameters::default()
        }
    }

    fn square(x0: i32, y0: i32, side: i32) -> Contour {
        Contour::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ])
    }

    /// Segmenter returning fixed contours and confidence, for
    /// composition tests.
    struct Fixed(Vec<Contour>, f64);

    impl Segmenter for Fixed {
        fn fingerprint(&self) -> String {
            format!("fixed({})", self.0.len())
        }

        fn segment(
            &self,
            image: &RasterImage,
            _params: &SegmentationParameters,
            _cancel: &CancellationToken,
        ) -> Result<Segmentation, AnalysisError> {
            Ok(Segmentation {
                dimensions: image.dimensions(),
                contours: self.0.clone(),
                rejected: RejectionCounts::default(),
                confidence: self.1,
                diagnostics: Vec::new(),
            })
        }
    }

    #[test]
    fn invalid_parameters_fail_before_image_checks() {
        // Zero-area image *and* bad parameters: parameters are reported.
        let image = RasterImage::new(0, 0, 1, vec![]).unwrap();
        let params = SegmentationParameters {
            min_contour_area: 10.0,
            max_contour_area: 5.0,
            ..SegmentationParameters::default()
        };
        let err = segment(&image, &params).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidParameters { .. }));
    }

    #[test]
    fn zero_area_image_is_unsupported() {
        let image = RasterImage::new(0, 4, 3, vec![]).unwrap();
        let err = segment(&image, &SegmentationParameters::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedImage { .. }));
    }

    #[test]
    fn single_disc_is_segmented_at_pixel_area() {
        let image = discs(40, 40, &[(20, 20, 8)]);
        let pixel_count = image.pixels().iter().filter(|&&p| p > 0).count();
        let seg = segment(&image, &unfiltered()).unwrap();
        assert_eq!(seg.contours.len(), 1);
        #[allow(clippy::cast_precision_loss)]
        let expected = pixel_count as f64;
        assert!((geometry::area(&seg.contours[0]) - expected).abs() < f64::EPSILON);
        assert_eq!(seg.diagnostics.len(), 1);
    }

    #[test]
    fn black_image_has_no_contours() {
        let image = RasterImage::new(32, 32, 1, vec![0; 32 * 32]).unwrap();
        let seg = segment(&image, &SegmentationParameters::default()).unwrap();
        assert!(seg.contours.is_empty());
        assert_eq!(seg.rejected_count(), 0);
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let contours = vec![square(0, 0, 10), square(20, 0, 5), square(40, 0, 20)];
        let (kept, rejected) = filter_by_area(contours.clone(), 100.0, 100.0);
        assert_eq!(kept, vec![square(0, 0, 10)]);
        assert_eq!(rejected.below_min_area, 1);
        assert_eq!(rejected.above_max_area, 1);

        let (kept, _) = filter_by_area(contours, 25.0, 400.0);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn cancelled_token_stops_before_first_stage() {
        let image = discs(20, 20, &[(10, 10, 4)]);
        let token = CancellationToken::new();
        token.cancel();
        let err = ClassicalSegmenter::new()
            .segment(&image, &unfiltered(), &token)
            .unwrap_err();
        assert_eq!(
            err,
            AnalysisError::Cancelled {
                stage: Stage::Grayscale
            }
        );
    }

    #[test]
    fn polarity_override_wins_over_parameters() {
        // Dark disc on a bright background.
        let mut image = discs(40, 40, &[(20, 20, 8)]);
        let inverted: Vec<u8> = image.pixels().iter().map(|p| 255 - p).collect();
        image = RasterImage::new(40, 40, 1, inverted).unwrap();

        let bright = ClassicalSegmenter::with_polarity(Polarity::BrightOnDark)
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        let dark = ClassicalSegmenter::with_polarity(Polarity::DarkOnBright)
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();

        // Dark-on-bright traces the disc itself; bright-on-dark traces the
        // background ring around it, which encloses more area.
        assert_eq!(dark.contours.len(), 1);
        let disc_area = geometry::area(&dark.contours[0]);
        assert!(disc_area > 150.0 && disc_area < 250.0, "disc area {disc_area}");
        assert!(bright.contours.iter().all(|c| (geometry::area(c) - disc_area).abs() > 1.0));
    }

    #[test]
    fn duplicates_need_similar_area_and_close_centroids() {
        let tol = DuplicateTolerance::default();
        // 10x10 vs 10x10 shifted by 3 px: duplicate.
        assert!(tol.is_duplicate(&square(0, 0, 10), &square(3, 0, 10)));
        // Same centre, area 100 vs 121 (> 10% apart): distinct.
        assert!(!tol.is_duplicate(&square(0, 0, 10), &square(0, 0, 11)));
        // Same area, 30 px apart: distinct.
        assert!(!tol.is_duplicate(&square(0, 0, 10), &square(30, 0, 10)));
        // Degenerate contours never match.
        let line = Contour::new(vec![Point::new(0, 0), Point::new(5, 0)]);
        assert!(!tol.is_duplicate(&line, &line));
    }

    #[test]
    fn suppress_duplicates_keeps_first_occurrence() {
        let (unique, dropped) = suppress_duplicates(
            vec![square(0, 0, 10), square(50, 50, 10), square(1, 1, 10)],
            &DuplicateTolerance::default(),
        );
        assert_eq!(unique, vec![square(0, 0, 10), square(50, 50, 10)]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn fallback_skipped_when_primary_suffices() {
        let image = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let seg = FallbackSegmenter::new(
            Fixed(vec![square(0, 0, 10), square(50, 0, 10)], 0.0),
            Fixed(vec![square(100, 0, 10)], 0.0),
        )
        .segment(&image, &unfiltered(), &CancellationToken::new())
        .unwrap();
        assert_eq!(seg.contours.len(), 2);
        assert_eq!(seg.rejected.duplicates, 0);
    }

    #[test]
    fn fallback_merges_and_deduplicates() {
        let image = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let seg = FallbackSegmenter::new(
            Fixed(vec![square(0, 0, 10)], 0.0),
            Fixed(vec![square(2, 2, 10), square(60, 60, 8)], 0.0),
        )
        .segment(&image, &unfiltered(), &CancellationToken::new())
        .unwrap();
        assert_eq!(seg.contours, vec![square(0, 0, 10), square(60, 60, 8)]);
        assert_eq!(seg.rejected.duplicates, 1);
    }

    #[test]
    fn classical_run_reports_every_stage_and_its_confidence() {
        let image = discs(60, 30, &[(12, 15, 6), (30, 15, 6), (48, 15, 6)]);
        let seg = segment(&image, &unfiltered()).unwrap();
        assert_eq!(seg.contours.len(), 3);
        assert!((seg.confidence - 0.15).abs() < 1e-12);
        let stages: Vec<Stage> = seg.diagnostics[0].stages.iter().map(|d| d.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Grayscale,
                Stage::Blur,
                Stage::Threshold,
                Stage::EdgeDetection,
                Stage::Morphology,
                Stage::ContourExtraction,
                Stage::Filtering,
            ]
        );
    }

    #[test]
    fn edge_map_closing_bridges_a_broken_rim() {
        // A 12x12 square rim with a one-pixel gap in its top side.
        let mut edges = GrayImage::new(30, 30);
        for i in 8..20 {
            for (x, y) in [(i, 8), (i, 19), (8, i), (19, i)] {
                edges.put_pixel(x, y, image::Luma([edge::EDGE]));
            }
        }
        edges.put_pixel(13, 8, image::Luma([0]));

        let open = ContourTracerKind::CrackFollowing.trace(&edges).unwrap();
        assert!(open.outer.iter().all(|c| geometry::area(c) < 100.0));

        let closed = ContourTracerKind::CrackFollowing
            .trace(&morphology::close(&edges, 3))
            .unwrap();
        assert_eq!(closed.outer.len(), 1);
        assert!((geometry::area(&closed.outer[0]) - 144.0).abs() < f64::EPSILON);
    }

    #[test]
    fn edge_confidence_saturates_at_twenty() {
        assert!(edge_confidence(0).abs() < f64::EPSILON);
        assert!((edge_confidence(5) - 0.25).abs() < 1e-12);
        assert!((edge_confidence(40) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hybrid_keeps_the_more_confident_result() {
        let image = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let edge = Fixed(vec![square(0, 0, 10), square(50, 0, 10)], 0.1);
        let color = Fixed(vec![square(0, 50, 10), square(50, 50, 10), square(100, 50, 10)], 0.6);
        let seg = HybridSegmenter::new(edge, color)
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        assert_eq!(seg.contours.len(), 3);
        assert!((seg.confidence - 0.6).abs() < f64::EPSILON);
        assert_eq!(seg.rejected.duplicates, 0);
    }

    #[test]
    fn hybrid_ties_go_to_edges() {
        let image = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let edge = Fixed(vec![square(0, 0, 10), square(50, 0, 10)], 0.5);
        let color = Fixed(vec![square(0, 50, 10), square(50, 50, 10), square(100, 50, 10)], 0.5);
        let seg = HybridSegmenter::new(edge, color)
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        assert_eq!(seg.contours, vec![square(0, 0, 10), square(50, 0, 10)]);
    }

    #[test]
    fn hybrid_tops_up_a_sparse_winner_without_duplicates() {
        let image = RasterImage::new(4, 4, 1, vec![0; 16]).unwrap();
        let edge = Fixed(vec![square(0, 0, 10), square(60, 60, 10)], 0.1);
        let color = Fixed(vec![square(1, 1, 10)], 0.9);
        let seg = HybridSegmenter::new(edge, color)
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        // Colour wins with one contour; the edge copy of it is dropped.
        assert_eq!(seg.contours, vec![square(1, 1, 10), square(60, 60, 10)]);
        assert_eq!(seg.rejected.duplicates, 1);
        assert!((seg.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_selection_thresholds() {
        let pick = |mean_saturation, hue_variance| {
            StrategyChoice::select(&HsvStatistics {
                mean_saturation,
                hue_variance,
            })
        };
        assert_eq!(pick(120.0, 900.0), StrategyChoice::Color);
        assert_eq!(pick(120.0, 100.0), StrategyChoice::Hybrid);
        assert_eq!(pick(40.0, 900.0), StrategyChoice::Hybrid);
        assert_eq!(pick(10.0, 900.0), StrategyChoice::Edge);
        assert_eq!(pick(50.0, 900.0), StrategyChoice::Hybrid);
        assert_eq!(pick(30.0, 0.0), StrategyChoice::Hybrid);
    }

    #[test]
    fn auto_uses_edges_on_grey_images() {
        let image = discs(40, 40, &[(20, 20, 8)]);
        let auto = AutoSegmenter::new();
        assert_eq!(auto.choose(&image).unwrap(), StrategyChoice::Edge);
        let seg = auto
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        let direct = segment(&image, &unfiltered()).unwrap();
        assert_eq!(seg.contours, direct.contours);
        assert_eq!(seg.diagnostics[0].strategy, "classical");
    }

    #[test]
    fn auto_uses_colour_on_saturated_varied_images() {
        // Left half red, right half blue: saturation 255, hue variance 3600.
        let mut pixels = Vec::new();
        for _y in 0..20 {
            for x in 0..40 {
                pixels.extend_from_slice(if x < 20 { &[220, 20, 20] } else { &[20, 20, 220] });
            }
        }
        let image = RasterImage::new(40, 20, 3, pixels).unwrap();
        let auto = AutoSegmenter::new();
        assert_eq!(auto.choose(&image).unwrap(), StrategyChoice::Color);
        let seg = auto
            .segment(&image, &unfiltered(), &CancellationToken::new())
            .unwrap();
        assert_eq!(seg.diagnostics[0].strategy, "color");
    }

    #[test]
    fn fingerprints_distinguish_strategies() {
        let plain = ClassicalSegmenter::new().fingerprint();
        let dark = ClassicalSegmenter::with_polarity(Polarity::DarkOnBright).fingerprint();
        assert_ne!(plain, dark);
        let composed = FallbackSegmenter::new(ClassicalSegmenter::new(), ClassicalSegmenter::new())
            .with_min_primary_contours(5)
            .fingerprint();
        assert!(composed.contains("min=5"));
        let names = [
            plain,
            ColorSegmenter::new().fingerprint(),
            HybridSegmenter::default().fingerprint(),
            AutoSegmenter::new().fingerprint(),
        ];
        for (i, a) in names.iter().enumerate() {
            assert!(names[i + 1..].iter().all(|b| a != b), "{a} repeats");
        }
    }
}
