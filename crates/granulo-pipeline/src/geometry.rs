//! Pure geometric functions over closed contours.
//!
//! Every area used for filtering, measurement and duplicate detection is
//! computed here, with the shoelace formula over the contour vertices.

use geo::{Area, ConvexHull, MultiPoint};

use crate::types::{Centroid, Contour, Point};

/// Twice the signed shoelace area, exact in integer arithmetic.
///
/// Positive for contours traversed clockwise on screen (y down), which
/// is how the crack-following tracer emits them.
#[must_use]
pub fn doubled_signed_area(contour: &Contour) -> i64 {
    edges(contour.points())
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum()
}

/// Enclosed area in px², independent of traversal direction.
#[must_use]
#[allow(clippy::cast_precision_loss)] // exact below 2^53
pub fn area(contour: &Contour) -> f64 {
    doubled_signed_area(contour).unsigned_abs() as f64 / 2.0
}

/// Length of the closed polyline, including the closing segment.
#[must_use]
pub fn perimeter(contour: &Contour) -> f64 {
    let points = contour.points();
    if points.len() < 2 {
        return 0.0;
    }
    edges(points)
        .map(|(a, b)| {
            let dx = f64::from(b.x) - f64::from(a.x);
            let dy = f64::from(b.y) - f64::from(a.y);
            dx.hypot(dy)
        })
        .sum()
}

/// Axis-aligned bounds of a contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Smallest x coordinate.
    pub min_x: i32,
    /// Smallest y coordinate.
    pub min_y: i32,
    /// Largest x coordinate.
    pub max_x: i32,
    /// Largest y coordinate.
    pub max_y: i32,
}

impl BoundingBox {
    /// Horizontal extent (`max_x - min_x`).
    #[must_use]
    pub fn width(&self) -> f64 {
        f64::from(self.max_x) - f64::from(self.min_x)
    }

    /// Vertical extent (`max_y - min_y`).
    #[must_use]
    pub fn height(&self) -> f64 {
        f64::from(self.max_y) - f64::from(self.min_y)
    }
}

/// Axis-aligned bounds, or `None` for an empty contour.
#[must_use]
pub fn bounding_box(contour: &Contour) -> Option<BoundingBox> {
    let (first, rest) = contour.points().split_first()?;
    Some(rest.iter().fold(
        BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        },
        |b, p| BoundingBox {
            min_x: b.min_x.min(p.x),
            min_y: b.min_y.min(p.y),
            max_x: b.max_x.max(p.x),
            max_y: b.max_y.max(p.y),
        },
    ))
}

/// Area centroid of the enclosed polygon.
///
/// Falls back to the vertex mean when the enclosed area is zero, and
/// returns `None` for an empty contour.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn centroid(contour: &Contour) -> Option<Centroid> {
    let points = contour.points();
    if points.is_empty() {
        return None;
    }

    let a2 = doubled_signed_area(contour);
    if a2 == 0 {
        let n = points.len() as f64;
        let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| {
            (sx + f64::from(p.x), sy + f64::from(p.y))
        });
        return Some(Centroid {
            x: sx / n,
            y: sy / n,
        });
    }

    let (mut cx, mut cy) = (0.0, 0.0);
    for (a, b) in edges(points) {
        let cross = (i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y)) as f64;
        cx += (f64::from(a.x) + f64::from(b.x)) * cross;
        cy += (f64::from(a.y) + f64::from(b.y)) * cross;
    }
    let six_a = 3.0 * a2 as f64;
    Some(Centroid {
        x: cx / six_a,
        y: cy / six_a,
    })
}

/// Diameter of the circle whose area equals `area`: `2 * sqrt(area / π)`.
#[must_use]
pub fn equivalent_diameter(area: f64) -> f64 {
    2.0 * (area / std::f64::consts::PI).sqrt()
}

/// Area of the contour's convex hull in px².
#[must_use]
pub fn convex_hull_area(contour: &Contour) -> f64 {
    if contour.len() < 3 {
        return 0.0;
    }
    let cloud: MultiPoint<f64> = contour
        .points()
        .iter()
        .map(|p| (f64::from(p.x), f64::from(p.y)))
        .collect::<Vec<_>>()
        .into();
    cloud.convex_hull().unsigned_area()
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
#[must_use]
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Consecutive vertex pairs, closing back to the first.
fn edges(points: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    points
        .iter()
        .copied()
        .zip(points.iter().copied().cycle().skip(1))
}
