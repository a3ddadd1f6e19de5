//! Segmentation diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning. Every segmentation run collects them alongside its
//! contours; they are deliberately kept out of
//! [`AnalysisResult`](crate::AnalysisResult) so that results stay
//! comparable across runs.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Contour, Stage};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single segmentation run.
///
/// Holds one entry per stage the strategy ran, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationDiagnostics {
    /// Which segmenter produced this run.
    pub strategy: String,
    /// Stages in execution order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: SegmentationSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Which stage ran.
    pub stage: Stage,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Intensity conversion metrics.
    Grayscale {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Channels in the source raster.
        channels: u8,
    },
    /// Gaussian blur metrics.
    Blur {
        /// Kernel width in pixels (1 = skipped).
        kernel_size: u32,
        /// Sigma derived from the kernel width; 0 when skipped.
        sigma: f32,
    },
    /// Otsu binarization metrics.
    Threshold {
        /// Chosen Otsu level.
        level: u8,
        /// Number of foreground pixels in the mask.
        foreground_pixels: usize,
        /// Total pixel count for computing coverage.
        total_pixels: u64,
    },
    /// Hysteresis edge extraction metrics.
    EdgeDetection {
        /// Low threshold.
        low_threshold: u8,
        /// High threshold.
        high_threshold: u8,
        /// Mask rim pixels considered.
        candidates: usize,
        /// Pixels at or above the high threshold.
        strong: usize,
        /// Weak pixels kept through connectivity.
        promoted: usize,
    },
    /// Colour-range mask metrics.
    ColorMask {
        /// HSV ranges combined into the mask.
        ranges: usize,
        /// Pixels inside at least one range.
        matched_pixels: usize,
        /// Total pixel count for computing coverage.
        total_pixels: u64,
    },
    /// Binary closing (and opening) metrics.
    Morphology {
        /// Square structuring element width (1 = skipped).
        kernel_size: u32,
        /// Whether an opening followed the closing.
        opened: bool,
        /// Set pixels before the operation.
        pixels_before: usize,
        /// Set pixels after the operation.
        pixels_after: usize,
    },
    /// Contour tracing metrics.
    ContourExtraction {
        /// Which tracer was used.
        tracer: String,
        /// Number of outer contours found.
        contour_count: usize,
        /// Components discarded as nested inside another.
        nested_count: usize,
        /// Total number of vertices across all contours.
        total_point_count: usize,
        /// Mean vertices per contour.
        mean_contour_points: f64,
    },
    /// Area filtering metrics.
    Filtering {
        /// Inclusive lower area bound (px²).
        min_area: f64,
        /// Inclusive upper area bound (px²).
        max_area: f64,
        /// Contours kept.
        accepted: usize,
        /// Contours below `min_area`.
        below_min: usize,
        /// Contours above `max_area`.
        above_max: usize,
    },
}

/// High-level summary counts for the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Contours that passed the area filter.
    pub accepted: usize,
    /// Contours rejected by the area filter.
    pub rejected: usize,
}

impl SegmentationDiagnostics {
    /// Diagnostics for `stage`, if this run executed it.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageDiagnostics> {
        self.stages.iter().find(|d| d.stage == stage)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Segmentation Diagnostics Report ({})\n{}",
            self.strategy,
            "=".repeat(60)
        ));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let name = diag.stage.to_string();
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Accepted contours: {}  |  Rejected: {}",
            self.summary.accepted, self.summary.rejected,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Grayscale {
            width,
            height,
            channels,
        } => format!("{width}x{height}, {channels} channel(s)"),
        StageMetrics::Blur { kernel_size, sigma } => {
            if *kernel_size <= 1 {
                "skipped".to_owned()
            } else {
                format!("k={kernel_size} sigma={sigma:.2}")
            }
        }
        StageMetrics::Threshold {
            level,
            foreground_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let coverage = if *total_pixels > 0 {
                *foreground_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("otsu={level} foreground={foreground_pixels} ({coverage:.1}%)")
        }
        StageMetrics::EdgeDetection {
            low_threshold,
            high_threshold,
            candidates,
            strong,
            promoted,
        } => format!(
            "low={low_threshold} high={high_threshold} rim={candidates} strong={strong} promoted={promoted}",
        ),
        StageMetrics::ColorMask {
            ranges,
            matched_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let coverage = if *total_pixels > 0 {
                *matched_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("{ranges} range(s) matched={matched_pixels} ({coverage:.1}%)")
        }
        StageMetrics::Morphology {
            kernel_size,
            opened,
            pixels_before,
            pixels_after,
        } => {
            if *kernel_size <= 1 {
                "skipped".to_owned()
            } else {
                let op = if *opened { "close+open" } else { "close" };
                format!("{op} k={kernel_size} pixels {pixels_before} -> {pixels_after}")
            }
        }
        StageMetrics::ContourExtraction {
            tracer,
            contour_count,
            nested_count,
            total_point_count,
            mean_contour_points,
        } => format!(
            "{tracer}: {contour_count} outer, {nested_count} nested, {total_point_count} pts (mean={mean_contour_points:.1})",
        ),
        StageMetrics::Filtering {
            min_area,
            max_area,
            accepted,
            below_min,
            above_max,
        } => format!(
            "[{min_area}, {max_area}] kept={accepted} below={below_min} above={above_max}",
        ),
    }
}

/// Total and mean vertex counts for a set of contours.
pub(crate) fn point_stats(contours: &[Contour]) -> (usize, f64) {
    let total: usize = contours.iter().map(Contour::len).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = if contours.is_empty() {
        0.0
    } else {
        total as f64 / contours.len() as f64
    };
    (total, mean)
}
