//! Shared types for the granulo analysis pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

// ───────────────────────── Raster input ──────────────────────────────

/// A decoded raster image handed to the pipeline by the caller.
///
/// Pixels are stored row-major and interleaved: `channels` bytes per
/// pixel, `width * channels` bytes per row. The buffer length is checked
/// on construction; channel layout and non-zero area are checked again by
/// the segmentation engine before any processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Channel counts the pipeline can convert to intensity:
    /// luma, luma + alpha, RGB and RGBA.
    pub const SUPPORTED_CHANNELS: [u8; 4] = [1, 2, 3, 4];

    /// Wrap an interleaved pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::UnsupportedImage`] if the buffer length is
    /// not `width * height * channels`.
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, AnalysisError> {
        let expected = u64::from(width) * u64::from(height) * u64::from(channels);
        if pixels.len() as u64 != expected {
            return Err(AnalysisError::unsupported_image(format!(
                "buffer holds {} bytes but {width}x{height} with {channels} channel(s) needs {expected}",
                pixels.len(),
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
        })
    }

    /// Copy a single-channel image.
    #[must_use]
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            channels: 1,
            pixels: image.as_raw().clone(),
        }
    }

    /// Copy a decoded image, keeping its channel layout where the
    /// pipeline supports it and widening to RGBA otherwise (16-bit and
    /// float formats).
    #[must_use]
    pub fn from_dynamic(image: &image::DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (channels, pixels) = match image {
            image::DynamicImage::ImageLuma8(buf) => (1, buf.as_raw().clone()),
            image::DynamicImage::ImageLumaA8(buf) => (2, buf.as_raw().clone()),
            image::DynamicImage::ImageRgb8(buf) => (3, buf.as_raw().clone()),
            other => (4, other.to_rgba8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        self.channels
    }

    /// The raw interleaved pixel buffer.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Image dimensions in pixels.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Returns `true` if the image has zero area.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

// ───────────────────────── Geometry ──────────────────────────────────

/// A 2D integer point in image coordinates.
///
/// Contours produced by crack following have vertices on pixel corners;
/// border following puts them on pixel centres. Either way the
/// coordinates are whole numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: i32,
    /// Vertical position (pixels from top edge).
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A closed polygon: the last point connects back to the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour(Vec<Point>);

impl Contour {
    /// Create a contour from its vertices in traversal order.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of vertices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all vertices.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }
}

/// Centre of mass of a contour's enclosed area, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Centroid {
    /// Euclidean distance to another centroid.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// ───────────────────────── Parameters ────────────────────────────────

/// Which intensity class holds the particles after Otsu binarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Polarity {
    /// Stones are brighter than the background (pixels above the Otsu
    /// level are foreground).
    #[default]
    BrightOnDark,
    /// Stones are darker than the background (pixels at or below the
    /// Otsu level are foreground).
    DarkOnBright,
}

/// Parameters for [`segment`](crate::segment::segment).
///
/// Invalid combinations are rejected by [`validate`](Self::validate)
/// before any image operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationParameters {
    /// Hysteresis low threshold on Sobel gradient magnitude. Boundary
    /// pixels at or above it are kept when connected to a strong edge.
    pub edge_low_threshold: u8,

    /// Hysteresis high threshold. Boundary pixels at or above it are
    /// strong edges. Must be strictly greater than `edge_low_threshold`.
    pub edge_high_threshold: u8,

    /// Smallest accepted contour area in px² (inclusive).
    pub min_contour_area: f64,

    /// Largest accepted contour area in px² (inclusive).
    pub max_contour_area: f64,

    /// Gaussian kernel width in pixels. Must be odd; `1` disables
    /// smoothing.
    pub blur_kernel_size: u32,

    /// Which side of the Otsu level is foreground.
    pub polarity: Polarity,

    /// Which contour tracing algorithm to use.
    pub contour_tracer: ContourTracerKind,

    /// Width of the square closing applied to the edge map, bridging
    /// gaps left by hysteresis. Must be odd; `1` disables it.
    #[serde(default = "SegmentationParameters::default_morphology_kernel_size")]
    pub morphology_kernel_size: u32,

    /// Colour-range segmentation settings.
    #[serde(default)]
    pub color: ColorParameters,
}

impl SegmentationParameters {
    /// Default hysteresis low threshold.
    pub const DEFAULT_EDGE_LOW_THRESHOLD: u8 = 50;
    /// Default hysteresis high threshold.
    pub const DEFAULT_EDGE_HIGH_THRESHOLD: u8 = 150;
    /// Default minimum contour area (px²). Anything smaller is dust.
    pub const DEFAULT_MIN_CONTOUR_AREA: f64 = 50.0;
    /// Default maximum contour area (px²).
    pub const DEFAULT_MAX_CONTOUR_AREA: f64 = 1_000_000.0;
    /// Default Gaussian kernel width.
    pub const DEFAULT_BLUR_KERNEL_SIZE: u32 = 5;
    /// Default edge-map closing width.
    pub const DEFAULT_MORPHOLOGY_KERNEL_SIZE: u32 = 3;

    const fn default_morphology_kernel_size() -> u32 {
        Self::DEFAULT_MORPHOLOGY_KERNEL_SIZE
    }

    /// Check every range and ordering constraint.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameters`] naming the first
    /// field that violates a constraint.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.edge_low_threshold >= self.edge_high_threshold {
            return Err(AnalysisError::invalid_parameter(
                "edge_low_threshold",
                format!(
                    "must be less than edge_high_threshold ({} >= {})",
                    self.edge_low_threshold, self.edge_high_threshold,
                ),
            ));
        }
        for (field, value) in [
            ("min_contour_area", self.min_contour_area),
            ("max_contour_area", self.max_contour_area),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::invalid_parameter(
                    field,
                    format!("must be a finite value >= 0, got {value}"),
                ));
            }
        }
        if self.min_contour_area > self.max_contour_area {
            return Err(AnalysisError::invalid_parameter(
                "min_contour_area",
                format!(
                    "must not exceed max_contour_area ({} > {})",
                    self.min_contour_area, self.max_contour_area,
                ),
            ));
        }
        if self.blur_kernel_size == 0 || self.blur_kernel_size % 2 == 0 {
            return Err(AnalysisError::invalid_parameter(
                "blur_kernel_size",
                format!("must be an odd integer >= 1, got {}", self.blur_kernel_size),
            ));
        }
        validate_structuring_width("morphology_kernel_size", self.morphology_kernel_size)?;
        self.color.validate()
    }
}

/// Square structuring elements are odd and at most `2 * 255 + 1` wide,
/// so their radius fits the `u8` that `imageproc::morphology` takes.
fn validate_structuring_width(field: &str, width: u32) -> Result<(), AnalysisError> {
    if width % 2 == 0 || width > 511 {
        return Err(AnalysisError::invalid_parameter(
            field,
            format!("must be an odd integer in 1..=511, got {width}"),
        ));
    }
    Ok(())
}

/// Radius of an odd square structuring element of `width` pixels.
///
/// Widths are validated to `1..=511`, so the radius fits a `u8`.
#[must_use]
pub(crate) fn structuring_radius(width: u32) -> u8 {
    u8::try_from(width / 2).unwrap_or(u8::MAX)
}

/// An inclusive box in OpenCV-style 8-bit HSV space: hue `0..=180`,
/// saturation and value `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    /// Lowest `[h, s, v]` inside the range.
    pub lower: [u8; 3],
    /// Highest `[h, s, v]` inside the range.
    pub upper: [u8; 3],
}

impl HsvRange {
    /// Largest hue on the half-degree scale.
    pub const MAX_HUE: u8 = 180;

    /// Create a range.
    #[must_use]
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    /// Returns `true` if every channel of `hsv` lies within the bounds.
    #[must_use]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }
}

/// Settings for [`ColorSegmenter`](crate::color::ColorSegmenter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorParameters {
    /// A pixel is foreground when it lies in any of these ranges.
    pub ranges: Vec<HsvRange>,
    /// Width of the square closing then opening applied to the mask.
    /// Must be odd; `1` disables both.
    pub morphology_kernel_size: u32,
}

impl ColorParameters {
    /// Red wraps around hue 0, so it takes two ranges.
    pub const RED_LOW: HsvRange = HsvRange::new([0, 30, 30], [15, 255, 255]);
    /// Upper red range.
    pub const RED_HIGH: HsvRange = HsvRange::new([165, 30, 30], [180, 255, 255]);
    /// Blue.
    pub const BLUE: HsvRange = HsvRange::new([90, 30, 30], [140, 255, 255]);
    /// Default mask closing/opening width.
    pub const DEFAULT_MORPHOLOGY_KERNEL_SIZE: u32 = 5;

    /// Check every range and the kernel width.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameters`] for an inverted range,
    /// a hue above [`HsvRange::MAX_HUE`], or an even or oversized kernel.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for (i, range) in self.ranges.iter().enumerate() {
            if (0..3).any(|c| range.lower[c] > range.upper[c]) {
                return Err(AnalysisError::invalid_parameter(
                    "color.ranges",
                    format!(
                        "range {i}: lower {:?} exceeds upper {:?}",
                        range.lower, range.upper
                    ),
                ));
            }
            if range.upper[0] > HsvRange::MAX_HUE {
                return Err(AnalysisError::invalid_parameter(
                    "color.ranges",
                    format!(
                        "range {i}: hue {} is above {}",
                        range.upper[0],
                        HsvRange::MAX_HUE
                    ),
                ));
            }
        }
        validate_structuring_width("color.morphology_kernel_size", self.morphology_kernel_size)
    }
}

impl Default for ColorParameters {
    fn default() -> Self {
        Self {
            ranges: vec![Self::RED_LOW, Self::RED_HIGH, Self::BLUE],
            morphology_kernel_size: Self::DEFAULT_MORPHOLOGY_KERNEL_SIZE,
        }
    }
}

impl Default for SegmentationParameters {
    fn default() -> Self {
        Self {
            edge_low_threshold: Self::DEFAULT_EDGE_LOW_THRESHOLD,
            edge_high_threshold: Self::DEFAULT_EDGE_HIGH_THRESHOLD,
            min_contour_area: Self::DEFAULT_MIN_CONTOUR_AREA,
            max_contour_area: Self::DEFAULT_MAX_CONTOUR_AREA,
            blur_kernel_size: Self::DEFAULT_BLUR_KERNEL_SIZE,
            polarity: Polarity::default(),
            contour_tracer: ContourTracerKind::default(),
            morphology_kernel_size: Self::DEFAULT_MORPHOLOGY_KERNEL_SIZE,
            color: ColorParameters::default(),
        }
    }
}

/// Which measurement the distribution statistics are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Diameter of the circle with the particle's area.
    #[default]
    EquivalentDiameter,
    /// Projected area.
    Area,
}

impl Metric {
    /// Read this metric from a record, in pixel units.
    #[must_use]
    pub const fn value(self, record: &MeasurementRecord) -> f64 {
        match self {
            Self::EquivalentDiameter => record.equivalent_diameter,
            Self::Area => record.area,
        }
    }

    /// Read this metric from a record, converted by `calibration` when
    /// present.
    #[must_use]
    pub fn calibrated_value(self, record: &MeasurementRecord, calibration: Option<Calibration>) -> f64 {
        let raw = self.value(record);
        match (self, calibration) {
            (_, None) => raw,
            (Self::EquivalentDiameter, Some(c)) => c.length(raw),
            (Self::Area, Some(c)) => c.area(raw),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EquivalentDiameter => write!(f, "equivalent diameter"),
            Self::Area => write!(f, "area"),
        }
    }
}

/// User-supplied conversion from pixels to a physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// How many pixels span one unit (e.g. pixels per millimetre).
    pub pixels_per_unit: f64,
}

impl Calibration {
    /// Convert a length in pixels to units.
    #[must_use]
    pub fn length(self, pixels: f64) -> f64 {
        pixels / self.pixels_per_unit
    }

    /// Convert an area in px² to units².
    #[must_use]
    pub fn area(self, pixels: f64) -> f64 {
        pixels / (self.pixels_per_unit * self.pixels_per_unit)
    }
}

/// One labelled size fraction: every value from `lower` up to the next
/// fraction's `lower` (exclusive) belongs to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeFraction {
    /// Display label, e.g. `"fine"`.
    pub label: String,
    /// Inclusive lower bound in the aggregated metric's unit.
    pub lower: f64,
}

impl SizeFraction {
    /// Create a fraction.
    #[must_use]
    pub fn new(label: impl Into<String>, lower: f64) -> Self {
        Self {
            label: label.into(),
            lower,
        }
    }
}

/// Ordered, contiguous half-open intervals `[lower_i, lower_{i+1})`.
/// The last interval is open-ended.
///
/// Construction rejects empty lists, non-finite bounds, bounds that are
/// not strictly increasing, and duplicate labels, so a valid value
/// always partitions `[first.lower, ∞)` without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SizeFraction>", into = "Vec<SizeFraction>")]
pub struct SizeFractionBoundaries(Vec<SizeFraction>);

impl SizeFractionBoundaries {
    /// Labels of the default three-tier split.
    pub const DEFAULT_LABELS: [&'static str; 3] = ["small", "medium", "large"];

    /// Validate and wrap a list of fractions.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameters`] if the list does not
    /// describe a partition.
    pub fn new(fractions: Vec<SizeFraction>) -> Result<Self, AnalysisError> {
        if fractions.is_empty() {
            return Err(AnalysisError::invalid_parameter(
                "fractions",
                "at least one size fraction is required",
            ));
        }
        for (i, fraction) in fractions.iter().enumerate() {
            if !fraction.lower.is_finite() {
                return Err(AnalysisError::invalid_parameter(
                    "fractions",
                    format!("lower bound of `{}` is not finite", fraction.label),
                ));
            }
            if fractions[..i].iter().any(|f| f.label == fraction.label) {
                return Err(AnalysisError::invalid_parameter(
                    "fractions",
                    format!("duplicate label `{}`", fraction.label),
                ));
            }
        }
        if let Some(pair) = fractions.windows(2).find(|w| w[0].lower >= w[1].lower) {
            return Err(AnalysisError::invalid_parameter(
                "fractions",
                format!(
                    "lower bounds must be strictly increasing (`{}` at {} then `{}` at {})",
                    pair[0].label, pair[0].lower, pair[1].label, pair[1].lower,
                ),
            ));
        }
        Ok(Self(fractions))
    }

    /// Split `[min, max]` into three equal-width tiers labelled
    /// [`DEFAULT_LABELS`](Self::DEFAULT_LABELS).
    ///
    /// A zero-width range collapses to a single `"medium"` fraction
    /// starting at `min`.
    #[must_use]
    pub fn default_tiers(min: f64, max: f64) -> Self {
        let [small, medium, large] = Self::DEFAULT_LABELS;
        if max <= min {
            return Self(vec![SizeFraction::new(medium, min)]);
        }
        let width = (max - min) / 3.0;
        Self(vec![
            SizeFraction::new(small, min),
            SizeFraction::new(medium, width.mul_add(1.0, min)),
            SizeFraction::new(large, width.mul_add(2.0, min)),
        ])
    }

    /// The fractions in ascending order.
    #[must_use]
    pub fn fractions(&self) -> &[SizeFraction] {
        &self.0
    }

    /// Number of fractions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: construction rejects empty lists.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exclusive upper bound of fraction `index`, `None` for the top one.
    #[must_use]
    pub fn upper(&self, index: usize) -> Option<f64> {
        self.0.get(index + 1).map(|f| f.lower)
    }

    /// Index of the fraction containing `value`, or `None` if `value`
    /// lies below the first lower bound (or is NaN).
    #[must_use]
    pub fn classify(&self, value: f64) -> Option<usize> {
        // partition_point over strictly increasing bounds: number of
        // fractions whose lower bound is <= value.
        let n = self.0.partition_point(|f| f.lower <= value);
        n.checked_sub(1)
    }
}

impl TryFrom<Vec<SizeFraction>> for SizeFractionBoundaries {
    type Error = AnalysisError;

    fn try_from(fractions: Vec<SizeFraction>) -> Result<Self, Self::Error> {
        Self::new(fractions)
    }
}

impl From<SizeFractionBoundaries> for Vec<SizeFraction> {
    fn from(boundaries: SizeFractionBoundaries) -> Self {
        boundaries.0
    }
}

/// Options for [`aggregate`](crate::stats::aggregate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOptions {
    /// Which measurement the statistics are computed over.
    pub metric: Metric,

    /// Number of linearly spaced histogram bins.
    pub histogram_bins: usize,

    /// Size fractions. `None` derives a three-tier split of the observed
    /// range.
    pub fractions: Option<SizeFractionBoundaries>,

    /// Optional pixel-to-unit conversion applied to the metric.
    pub calibration: Option<Calibration>,
}

impl AggregationOptions {
    /// Default histogram bin count.
    pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

    /// Check the options.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameters`] for a zero bin count
    /// or a non-positive calibration.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.histogram_bins == 0 {
            return Err(AnalysisError::invalid_parameter(
                "histogram_bins",
                "must be at least 1",
            ));
        }
        if let Some(calibration) = self.calibration
            && !(calibration.pixels_per_unit.is_finite() && calibration.pixels_per_unit > 0.0)
        {
            return Err(AnalysisError::invalid_parameter(
                "pixels_per_unit",
                format!(
                    "must be a finite value > 0, got {}",
                    calibration.pixels_per_unit
                ),
            ));
        }
        Ok(())
    }
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            histogram_bins: Self::DEFAULT_HISTOGRAM_BINS,
            fractions: None,
            calibration: None,
        }
    }
}

/// Everything that determines an [`AnalysisResult`] besides the image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Segmentation stage parameters.
    pub segmentation: SegmentationParameters,
    /// Statistics and classification options.
    pub aggregation: AggregationOptions,
}

impl AnalysisConfig {
    /// Validate both halves of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidParameters`] naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.segmentation.validate()?;
        self.aggregation.validate()
    }
}

// ───────────────────────── Results ───────────────────────────────────

/// Geometric measurements of one accepted particle, in pixel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Enclosed area (px²).
    pub area: f64,
    /// `2 * sqrt(area / π)` (px).
    pub equivalent_diameter: f64,
    /// Length of the closed contour (px).
    pub perimeter: f64,
    /// Horizontal extent of the contour (px).
    pub bounding_box_width: f64,
    /// Vertical extent of the contour (px).
    pub bounding_box_height: f64,
    /// Area centroid.
    pub centroid: Centroid,
    /// Area of the contour's convex hull (px²).
    pub convex_hull_area: f64,
    /// `area / convex_hull_area`; 0 when the hull is degenerate.
    pub solidity: f64,
    /// `bounding_box_width / bounding_box_height`; 0 when the height is 0.
    pub aspect_ratio: f64,
    /// `area / (bounding_box_width * bounding_box_height)`; 0 when the box
    /// is degenerate.
    pub extent: f64,
}

/// Distribution summary over the chosen metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// Number of values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Middle value; mean of the two middle values for even counts.
    pub median: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Sum of all values.
    pub total: f64,
    /// Sum of particle areas (px², or units² when calibrated).
    pub total_area: f64,
    /// Largest particle's share of `total_area`, in percent.
    pub largest_area_share: f64,
}

/// Crusher condition read from the particle-size distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentStatus {
    /// Output looks like a working crusher.
    Good,
    /// One oversized particle dominates the output.
    NeedsAttention,
    /// Nothing was found in the image.
    Abnormal,
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Good => "good",
            Self::NeedsAttention => "needs attention",
            Self::Abnormal => "abnormal",
        })
    }
}

/// Suggested follow-up for the crusher operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    /// No particles: inspect the line immediately.
    ImmediateInspection,
    /// Oversized output: check the crusher blades for wear.
    CheckCrusherWear,
    /// Fine, even output: keep monitoring.
    KeepMonitoring,
    /// Normal output: maintain on schedule.
    RoutineMaintenance,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImmediateInspection => "inspect immediately",
            Self::CheckCrusherWear => "check crusher blade wear",
            Self::KeepMonitoring => "normal, keep monitoring",
            Self::RoutineMaintenance => "routine maintenance as scheduled",
        })
    }
}

/// Maintenance verdict derived from the largest particle's area share.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceAssessment {
    /// Heuristic crushing efficiency score, in percent.
    pub crushing_efficiency: f64,
    /// Overall equipment condition.
    pub equipment_status: EquipmentStatus,
    /// What to do next.
    pub recommendation: Recommendation,
}

impl MaintenanceAssessment {
    /// Above this largest-area share (percent) one particle dominates.
    pub const DOMINANT_SHARE: f64 = 50.0;
    /// Below this largest-area share (percent) the output is fine.
    pub const FINE_SHARE: f64 = 10.0;
}

/// Linearly spaced histogram over the chosen metric.
///
/// `edges` has one more entry than `counts`. Both are empty when there
/// were no values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges in ascending order.
    pub edges: Vec<f64>,
    /// Values per bin. The last bin is closed on the right.
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Sum of all bin counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Population of one size fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionClass {
    /// Fraction label.
    pub label: String,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Exclusive upper bound; `None` for the open-ended top fraction.
    pub upper: Option<f64>,
    /// Records assigned to this fraction.
    pub count: usize,
    /// `count` as a percentage of all records.
    pub percentage: f64,
    /// Percentage of records in this and all smaller fractions.
    pub cumulative_percentage: f64,
}

/// Contours discarded on the way from the edge map to the record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RejectionCounts {
    /// Area below `min_contour_area`.
    pub below_min_area: usize,
    /// Area above `max_contour_area`.
    pub above_max_area: usize,
    /// Dropped as duplicates when merging strategies.
    pub duplicates: usize,
    /// Fewer than three vertices or zero enclosed area at measurement.
    pub degenerate: usize,
}

impl RejectionCounts {
    /// All rejections combined.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.below_min_area + self.above_max_area + self.duplicates + self.degenerate
    }
}

/// Final output of one pipeline run.
///
/// Contains no timings, so two runs over identical inputs compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Source image dimensions in pixels.
    pub dimensions: Dimensions,
    /// Contours that passed the area filter.
    pub accepted_count: usize,
    /// Why the other contours were dropped.
    pub rejected: RejectionCounts,
    /// One record per measurable accepted contour, in contour order.
    pub records: Vec<MeasurementRecord>,
    /// The metric the statistics below describe.
    pub metric: Metric,
    /// Calibration applied to the statistics, if any.
    pub calibration: Option<Calibration>,
    /// `None` when no particles were found.
    pub statistics: Option<SummaryStatistics>,
    /// Histogram over the metric.
    pub histogram: Histogram,
    /// Size-fraction populations in ascending order.
    pub classification: Vec<FractionClass>,
    /// Crusher condition inferred from the statistics.
    pub maintenance: MaintenanceAssessment,
}

impl AnalysisResult {
    /// Approximate heap footprint, used for cache byte budgets.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.records.len() * std::mem::size_of::<MeasurementRecord>()
            + self.histogram.edges.len() * std::mem::size_of::<f64>()
            + self.histogram.counts.len() * std::mem::size_of::<usize>()
            + self
                .classification
                .iter()
                .map(|c| std::mem::size_of::<FractionClass>() + c.label.len())
                .sum::<usize>()
    }
}

// ───────────────────────── Errors ────────────────────────────────────

/// Pipeline stages, used to report where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Conversion to single-channel intensity.
    Grayscale,
    /// Gaussian smoothing.
    Blur,
    /// Otsu binarization.
    Threshold,
    /// Hysteresis edge extraction.
    EdgeDetection,
    /// HSV colour-range masking.
    ColorMask,
    /// Binary closing and opening.
    Morphology,
    /// Outer contour tracing.
    ContourExtraction,
    /// Area filtering.
    Filtering,
    /// Per-contour measurement.
    Measurement,
    /// Summary statistics and histogram.
    Aggregation,
    /// Size-fraction assignment.
    Classification,
    /// Result cache bookkeeping.
    Cache,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Grayscale => "grayscale",
            Self::Blur => "blur",
            Self::Threshold => "threshold",
            Self::EdgeDetection => "edge detection",
            Self::ColorMask => "color mask",
            Self::Morphology => "morphology",
            Self::ContourExtraction => "contour extraction",
            Self::Filtering => "filtering",
            Self::Measurement => "measurement",
            Self::Aggregation => "aggregation",
            Self::Classification => "classification",
            Self::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during analysis.
///
/// `Clone` so that a failed in-flight cache computation can hand the
/// same error to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum AnalysisError {
    /// A parameter failed a range or ordering check.
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameters {
        /// The offending field.
        field: String,
        /// The violated constraint.
        reason: String,
    },

    /// The image is empty, malformed, or has an unsupported layout.
    #[error("unsupported image: {reason}")]
    UnsupportedImage {
        /// What is wrong with the image.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("computation failed during {stage}: {detail}")]
    ComputationFailure {
        /// Stage that detected the violation.
        stage: Stage,
        /// Diagnostic context.
        detail: String,
    },

    /// The caller cancelled the run.
    #[error("analysis cancelled before {stage}")]
    Cancelled {
        /// The stage that was about to start.
        stage: Stage,
    },
}

impl AnalysisError {
    pub(crate) fn invalid_parameter(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported_image(reason: impl Into<String>) -> Self {
        Self::UnsupportedImage {
            reason: reason.into(),
        }
    }

    pub(crate) fn computation(stage: Stage, detail: impl Into<String>) -> Self {
        Self::ComputationFailure {
            stage,
            detail: detail.into(),
        }
    }

    /// The stage this error is attributed to, if any.
    ///
    /// Parameter and image errors are raised before any stage runs.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::ComputationFailure { stage, .. } | Self::Cancelled { stage } => Some(*stage),
            Self::InvalidParameters { .. } | Self::UnsupportedImage { .. } => None,
        }
    }
}
