//! Per-contour geometric measurement.

use crate::geometry;
use crate::types::{Centroid, Contour, MeasurementRecord};

/// Records for the measurable contours, plus how many were not.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Measurements {
    /// One record per measurable contour, in input order.
    pub records: Vec<MeasurementRecord>,
    /// Contours with fewer than three vertices or zero enclosed area.
    pub degenerate: usize,
}

/// Measure one contour, or `None` if it is degenerate.
#[must_use]
pub fn measure_contour(contour: &Contour) -> Option<MeasurementRecord> {
    if contour.len() < 3 {
        return None;
    }
    let area = geometry::area(contour);
    if area <= 0.0 {
        return None;
    }

    let bbox = geometry::bounding_box(contour)?;
    let centroid = geometry::centroid(contour).unwrap_or(Centroid { x: 0.0, y: 0.0 });
    let convex_hull_area = geometry::convex_hull_area(contour);
    let (width, height) = (bbox.width(), bbox.height());

    Some(MeasurementRecord {
        area,
        equivalent_diameter: geometry::equivalent_diameter(area),
        perimeter: geometry::perimeter(contour),
        bounding_box_width: width,
        bounding_box_height: height,
        centroid,
        convex_hull_area,
        solidity: geometry::ratio_or_zero(area, convex_hull_area),
        aspect_ratio: geometry::ratio_or_zero(width, height),
        extent: geometry::ratio_or_zero(area, width * height),
    })
}

/// Measure every contour, preserving order and counting degenerate ones.
#[must_use]
pub fn measure(contours: &[Contour]) -> Measurements {
    let mut out = Measurements::default();
    for contour in contours {
        match measure_contour(contour) {
            Some(record) => out.records.push(record),
            None => out.degenerate += 1,
        }
    }
    if out.degenerate > 0 {
        log::warn!(
            "{} of {} contour(s) were degenerate and not measured",
            out.degenerate,
            contours.len(),
        );
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn contour(coords: &[(i32, i32)]) -> Contour {
        Contour::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn rectangle_measurements() {
        let r = measure_contour(&contour(&[(10, 20), (18, 20), (18, 24), (10, 24)])).unwrap();
        assert!((r.area - 32.0).abs() < 1e-12);
        assert!((r.perimeter - 24.0).abs() < 1e-12);
        assert!((r.bounding_box_width - 8.0).abs() < 1e-12);
        assert!((r.bounding_box_height - 4.0).abs() < 1e-12);
        assert!((r.centroid.x - 14.0).abs() < 1e-12);
        assert!((r.centroid.y - 22.0).abs() < 1e-12);
        assert!((r.equivalent_diameter - 2.0 * (32.0 / std::f64::consts::PI).sqrt()).abs() < 1e-12);
        assert!((r.solidity - 1.0).abs() < 1e-9);
        assert!((r.aspect_ratio - 2.0).abs() < 1e-12);
        assert!((r.extent - 1.0).abs() < 1e-12);
    }

    #[test]
    fn concave_shape_has_lower_solidity() {
        let l = measure_contour(&contour(&[(0, 0), (4, 0), (4, 1), (1, 1), (1, 3), (0, 3)])).unwrap();
        assert!((l.solidity - 6.0 / 9.0).abs() < 1e-9);
        assert!((l.extent - 0.5).abs() < 1e-12);
    }

    #[test]
    fn degenerate_contours_are_counted_not_measured() {
        let contours = vec![
            contour(&[(0, 0), (1, 0)]),
            contour(&[(0, 0), (2, 0), (2, 2), (0, 2)]),
            contour(&[(0, 0), (1, 1), (2, 2)]),
        ];
        let m = measure(&contours);
        assert_eq!(m.records.len(), 1);
        assert_eq!(m.degenerate, 2);
        assert!((m.records[0].area - 4.0).abs() < 1e-12);
    }

    #[test]
    fn order_is_preserved() {
        let contours = vec![
            contour(&[(0, 0), (3, 0), (3, 3), (0, 3)]),
            contour(&[(0, 0), (1, 0), (1, 1), (0, 1)]),
            contour(&[(0, 0), (2, 0), (2, 2), (0, 2)]),
        ];
        let areas: Vec<f64> = measure(&contours).records.iter().map(|r| r.area).collect();
        assert_eq!(areas, vec![9.0, 1.0, 4.0]);
    }
}
