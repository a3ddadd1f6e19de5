//! Distribution statistics, histogram and size-fraction classification.
//!
//! All three are computed over one metric of the measurement records
//! (equivalent diameter by default), optionally converted to physical
//! units. An empty record set produces no statistics at all rather than
//! zeros, so callers can tell "no particles" from "tiny particles".

use crate::types::{
    AggregationOptions, AnalysisError, Calibration, EquipmentStatus, FractionClass, Histogram,
    MaintenanceAssessment, MeasurementRecord, Metric, Recommendation, SizeFractionBoundaries,
    Stage, SummaryStatistics,
};

/// Output of [`aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    /// Metric the numbers below describe.
    pub metric: Metric,
    /// Unit conversion applied, if any.
    pub calibration: Option<Calibration>,
    /// `None` for an empty record set.
    pub statistics: Option<SummaryStatistics>,
    /// Histogram over the metric.
    pub histogram: Histogram,
    /// Per-fraction populations in ascending order.
    pub classification: Vec<FractionClass>,
    /// Crusher condition read from `statistics`.
    pub maintenance: MaintenanceAssessment,
}

/// Summarize `records` according to `options`.
///
/// # Errors
///
/// - [`AnalysisError::InvalidParameters`] for invalid `options`.
/// - [`AnalysisError::ComputationFailure`] at [`Stage::Aggregation`] if a
///   metric value is not finite, or at [`Stage::Classification`] if a
///   value falls below the first supplied fraction boundary.
pub fn aggregate(
    records: &[MeasurementRecord],
    options: &AggregationOptions,
) -> Result<Distribution, AnalysisError> {
    options.validate()?;

    let values: Vec<f64> = records
        .iter()
        .map(|r| options.metric.calibrated_value(r, options.calibration))
        .collect();
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(AnalysisError::computation(
            Stage::Aggregation,
            format!("record {i} has non-finite {} {v}", options.metric),
        ));
    }
    let areas: Vec<f64> = records
        .iter()
        .map(|r| Metric::Area.calibrated_value(r, options.calibration))
        .collect();

    let statistics = summarize(&values, &areas);
    let histogram = statistics.as_ref().map_or_else(Histogram::default, |s| {
        histogram(&values, options.histogram_bins, s.min, s.max)
    });

    let boundaries = match (&options.fractions, &statistics) {
        (Some(supplied), _) => Some(supplied.clone()),
        (None, Some(s)) => Some(SizeFractionBoundaries::default_tiers(s.min, s.max)),
        (None, None) => None,
    };
    let classification = match boundaries {
        Some(b) => classify(&values, &b)?,
        None => Vec::new(),
    };

    log::debug!(
        "aggregated {} record(s) over {}: {} bin(s), {} fraction(s)",
        values.len(),
        options.metric,
        histogram.counts.len(),
        classification.len(),
    );

    let maintenance = assess_maintenance(statistics.as_ref());

    Ok(Distribution {
        metric: options.metric,
        calibration: options.calibration,
        statistics,
        histogram,
        classification,
        maintenance,
    })
}

/// Grade crusher output by how much of the total area the largest
/// particle takes up.
///
/// No particles at all is abnormal. A share above
/// [`MaintenanceAssessment::DOMINANT_SHARE`] means oversized output; one
/// below [`MaintenanceAssessment::FINE_SHARE`] means fine, even output.
#[must_use]
pub fn assess_maintenance(statistics: Option<&SummaryStatistics>) -> MaintenanceAssessment {
    let Some(stats) = statistics.filter(|s| s.count > 0) else {
        return MaintenanceAssessment {
            crushing_efficiency: 0.0,
            equipment_status: EquipmentStatus::Abnormal,
            recommendation: Recommendation::ImmediateInspection,
        };
    };
    let share = stats.largest_area_share;
    let (crushing_efficiency, equipment_status, recommendation) =
        if share > MaintenanceAssessment::DOMINANT_SHARE {
            (60.0, EquipmentStatus::NeedsAttention, Recommendation::CheckCrusherWear)
        } else if share < MaintenanceAssessment::FINE_SHARE {
            (90.0, EquipmentStatus::Good, Recommendation::KeepMonitoring)
        } else {
            (85.0, EquipmentStatus::Good, Recommendation::RoutineMaintenance)
        };
    MaintenanceAssessment {
        crushing_efficiency,
        equipment_status,
        recommendation,
    }
}

/// Summary statistics, or `None` for no values.
///
/// `areas` must be parallel to `values`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(values: &[f64], areas: &[f64]) -> Option<SummaryStatistics> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let total: f64 = values.iter().sum();
    let mean = total / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    } else {
        sorted[mid]
    };

    let total_area: f64 = areas.iter().sum();
    let largest_area = areas.iter().copied().fold(0.0, f64::max);
    let largest_area_share = if total_area > 0.0 {
        largest_area / total_area * 100.0
    } else {
        0.0
    };

    Some(SummaryStatistics {
        count: values.len(),
        mean,
        median,
        std_dev: variance.sqrt(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        total,
        total_area,
        largest_area_share,
    })
}

/// Linearly spaced histogram of `values` over `[min, max]`.
///
/// The last bin is closed on the right. When `min == max` every value
/// lands in a single bin.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn histogram(values: &[f64], bins: usize, min: f64, max: f64) -> Histogram {
    if values.is_empty() || bins == 0 {
        return Histogram::default();
    }
    let range = max - min;
    if range <= 0.0 {
        return Histogram {
            edges: vec![min, max],
            counts: vec![values.len()],
        };
    }

    let mut edges: Vec<f64> = (0..=bins)
        .map(|i| (range * i as f64).mul_add(1.0 / bins as f64, min))
        .collect();
    edges[bins] = max;

    // Bin i holds edges[i] <= v < edges[i + 1]; the last bin also holds max.
    let mut counts = vec![0usize; bins];
    for &v in values {
        let idx = edges[..bins].partition_point(|&e| e <= v).saturating_sub(1);
        counts[idx] += 1;
    }
    Histogram { edges, counts }
}

/// Assign every value to exactly one fraction.
///
/// # Errors
///
/// Returns [`AnalysisError::ComputationFailure`] at
/// [`Stage::Classification`] if a value lies below the first boundary,
/// i.e. the fractions fail to cover the observed range.
#[allow(clippy::cast_precision_loss)]
pub fn classify(
    values: &[f64],
    boundaries: &SizeFractionBoundaries,
) -> Result<Vec<FractionClass>, AnalysisError> {
    let mut counts = vec![0usize; boundaries.len()];
    for &v in values {
        let idx = boundaries.classify(v).ok_or_else(|| {
            AnalysisError::computation(
                Stage::Classification,
                format!(
                    "value {v} lies below the first size fraction `{}` (lower bound {})",
                    boundaries.fractions()[0].label,
                    boundaries.fractions()[0].lower,
                ),
            )
        })?;
        counts[idx] += 1;
    }

    let n = values.len();
    let percent = |count: usize| {
        if n == 0 {
            0.0
        } else {
            count as f64 / n as f64 * 100.0
        }
    };

    let mut cumulative = 0usize;
    Ok(boundaries
        .fractions()
        .iter()
        .enumerate()
        .map(|(i, fraction)| {
            cumulative += counts[i];
            FractionClass {
                label: fraction.label.clone(),
                lower: fraction.lower,
                upper: boundaries.upper(i),
                count: counts[i],
                percentage: percent(counts[i]),
                cumulative_percentage: percent(cumulative),
            }
        })
        .collect())
}
