//! granulo-pipeline: grain segmentation and size-fraction analysis (sans-IO).
//!
//! Turns a photograph of crushed stone into a particle-size distribution:
//! grayscale -> blur -> Otsu threshold -> hysteresis edges -> closing ->
//! outer contours -> area filter -> measurement -> statistics +
//! classification + maintenance assessment. Colour-coded stones can be
//! segmented from HSV ranges instead, or the strategy picked per image.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! rasters and byte slices and returns structured data. File access,
//! logging setup and presentation live in `granulo-bench` or in the
//! caller.

pub mod analysis;
pub mod blur;
pub mod cache;
pub mod cancel;
pub mod color;
pub mod contour;
pub mod diagnostics;
pub mod edge;
pub mod geometry;
pub mod grayscale;
pub mod measure;
pub mod morphology;
pub mod segment;
pub mod stats;
pub mod threshold;
pub mod types;

pub use analysis::{
    AnalysisEvent, AnalysisHandle, AnalysisReport, Analyzer, analyze, spawn_analysis,
};
pub use cache::{CacheKey, CacheLimits, CacheStats, ResultCache};
pub use cancel::CancellationToken;
pub use color::{ColorSegmenter, HsvStatistics};
pub use contour::{ContourTracer, ContourTracerKind};
pub use diagnostics::SegmentationDiagnostics;
pub use segment::{
    AutoSegmenter, ClassicalSegmenter, DuplicateTolerance, FallbackSegmenter, HybridSegmenter,
    Segmentation, Segmenter, StrategyChoice, segment,
};
pub use types::{
    AggregationOptions, AnalysisConfig, AnalysisError, AnalysisResult, Calibration, Centroid,
    ColorParameters, Contour, Dimensions, EquipmentStatus, FractionClass, Histogram, HsvRange,
    MaintenanceAssessment, MeasurementRecord, Metric, Point, Polarity, RasterImage,
    Recommendation, RejectionCounts, SegmentationParameters, SizeFraction,
    SizeFractionBoundaries, Stage, SummaryStatistics,
};

/// Decode encoded image bytes and run the full analysis.
///
/// Takes raw image bytes (PNG, JPEG, BMP, WebP) and a configuration and
/// produces an [`AnalysisResult`] with the default
/// [`ClassicalSegmenter`], no cache and no cancellation.
///
/// # Pipeline steps
///
/// 1. Decode and convert to single-channel intensity
/// 2. Gaussian blur (skipped for a kernel width of 1)
/// 3. Otsu binarization
/// 4. Hysteresis edge extraction
/// 5. Edge-map closing
/// 6. Outer contour tracing (pluggable strategy)
/// 7. Inclusive area filtering
/// 8. Per-contour measurement
/// 9. Summary statistics, histogram, size-fraction classification and
///    maintenance assessment
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidParameters`] if `config` is invalid.
/// Returns [`AnalysisError::UnsupportedImage`] if `image_bytes` is empty
/// or cannot be decoded.
/// Returns [`AnalysisError::ComputationFailure`] if a later stage detects
/// an internal inconsistency.
pub fn analyze_bytes(
    image_bytes: &[u8],
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;
    let raster = grayscale::decode(image_bytes)?;
    analyze(&raster, config)
}
