//! Hysteresis edge extraction on the binarized particle mask.
//!
//! Edge candidates are the foreground pixels of the Otsu mask that touch
//! background through one of their four neighbours, i.e. the one-pixel
//! inner rim of every particle. Pixels beyond the image count as
//! background, so a particle cut by the frame gets a rim along the frame
//! and its boundary still closes. Each candidate is scored by the Sobel
//! gradient magnitude of the smoothed intensity image:
//!
//! - `strength >= high` → strong edge, always kept;
//! - `low <= strength < high` → weak edge, kept only when 8-connected
//!   (directly or through other weak edges) to a strong edge;
//! - `strength < low` → dropped, except on the image frame.
//!
//! Replicated borders flatten the gradient across the frame, so frame
//! candidates are always weak edges: they survive exactly when they
//! connect to a strong rim.
//!
//! Magnitudes are on the raw Sobel scale (`0..=1443` for 8-bit input),
//! so the `u8` thresholds select fairly strong boundaries.
//!
//! The output is a binary edge map: 255 for edge pixels, 0 elsewhere.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::threshold::{BACKGROUND, FOREGROUND};

/// Edge pixel value.
pub const EDGE: u8 = 255;

/// Result of [`detect_edges`].
#[derive(Debug, Clone)]
pub struct EdgeMap {
    /// Binary edge map, same size as the input.
    pub edges: GrayImage,
    /// Rim pixels that were considered.
    pub candidates: usize,
    /// Rim pixels at or above the high threshold.
    pub strong: usize,
    /// Weak rim pixels kept through connectivity.
    pub promoted: usize,
}

impl EdgeMap {
    /// Total edge pixels in the map.
    #[must_use]
    pub const fn edge_pixels(&self) -> usize {
        self.strong + self.promoted
    }
}

/// Sobel gradient magnitude of `image`, with borders replicated.
#[must_use]
pub fn gradient_magnitude(image: &GrayImage) -> Vec<f32> {
    let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
    gx.pixels()
        .zip(gy.pixels())
        .map(|(h, v)| f32::from(h.0[0]).hypot(f32::from(v.0[0])))
        .collect()
}

/// Returns `true` if the foreground pixel at `(x, y)` has a 4-neighbour
/// that is background or lies outside the image.
fn is_rim(mask: &GrayImage, x: u32, y: u32) -> bool {
    if mask.get_pixel(x, y).0[0] != FOREGROUND {
        return false;
    }
    let (w, h) = mask.dimensions();
    let neighbours = [
        (x.checked_sub(1), Some(y)),
        ((x + 1 < w).then_some(x + 1), Some(y)),
        (Some(x), y.checked_sub(1)),
        (Some(x), (y + 1 < h).then_some(y + 1)),
    ];
    neighbours.into_iter().any(|n| match n {
        (Some(nx), Some(ny)) => mask.get_pixel(nx, ny).0[0] == BACKGROUND,
        _ => true,
    })
}

const fn on_frame(x: u32, y: u32, w: u32, h: u32) -> bool {
    x == 0 || y == 0 || x + 1 == w || y + 1 == h
}

/// Extract particle boundaries from `mask`, scored on `smoothed`.
///
/// `mask` and `smoothed` must have the same dimensions; they always do
/// inside the pipeline because both derive from the same image.
#[must_use = "returns the binary edge map"]
pub fn detect_edges(smoothed: &GrayImage, mask: &GrayImage, low: u8, high: u8) -> EdgeMap {
    let (w, h) = mask.dimensions();
    let strength = gradient_magnitude(smoothed);
    let low = f32::from(low);
    let high = f32::from(high);
    let idx = |x: u32, y: u32| (y as usize) * (w as usize) + x as usize;

    // Weak-or-better rim pixels; strong ones seed the search.
    let mut eligible = vec![false; strength.len()];
    let mut seeds = Vec::new();
    let mut candidates = 0usize;
    for y in 0..h {
        for x in 0..w {
            if !is_rim(mask, x, y) {
                continue;
            }
            candidates += 1;
            let s = strength[idx(x, y)];
            if s >= low || on_frame(x, y, w, h) {
                eligible[idx(x, y)] = true;
            }
            if s >= high {
                seeds.push((x, y));
            }
        }
    }

    let mut out = GrayImage::from_pixel(w, h, Luma([0]));
    let strong = seeds.len();
    let mut kept = 0usize;
    for &(x, y) in &seeds {
        if out.get_pixel(x, y).0[0] == EDGE {
            continue;
        }
        out.put_pixel(x, y, Luma([EDGE]));
        kept += 1;
        let mut stack = vec![(x, y)];
        while let Some((nx, ny)) = stack.pop() {
            let neighbour_indices = [
                (nx + 1, ny),
                (nx + 1, ny + 1),
                (nx, ny + 1),
                (nx.wrapping_sub(1), ny.wrapping_sub(1)),
                (nx.wrapping_sub(1), ny),
                (nx.wrapping_sub(1), ny + 1),
                (nx, ny.wrapping_sub(1)),
                (nx + 1, ny.wrapping_sub(1)),
            ];
            for (px, py) in neighbour_indices {
                if px >= w || py >= h {
                    continue;
                }
                if eligible[idx(px, py)] && out.get_pixel(px, py).0[0] == 0 {
                    out.put_pixel(px, py, Luma([EDGE]));
                    kept += 1;
                    stack.push((px, py));
                }
            }
        }
    }

    // Seeds reached through another seed's search still count as strong.
    let promoted = kept.saturating_sub(strong);
    log::debug!(
        "edges: {candidates} rim candidates, {strong} strong, {promoted} promoted (low={low}, high={high})"
    );

    EdgeMap {
        edges: out,
        candidates,
        strong,
        promoted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::binarize;
    use crate::types::Polarity;

    /// 20x20 black image with a bright 8x8 square at (6, 6).
    fn square_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    fn count_edges(map: &EdgeMap) -> usize {
        map.edges.pixels().filter(|p| p.0[0] == EDGE).count()
    }

    #[test]
    fn uniform_image_produces_no_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([128]));
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 50, 150);
        assert_eq!(map.candidates, 0);
        assert_eq!(count_edges(&map), 0);
    }

    #[test]
    fn square_rim_is_fully_detected() {
        let img = square_image();
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 50, 150);
        // 8x8 square: rim is 8*4 - 4 = 28 pixels.
        assert_eq!(map.candidates, 28);
        assert_eq!(count_edges(&map), 28);
        assert_eq!(map.edge_pixels(), 28);
        // Interior pixel is not an edge.
        assert_eq!(map.edges.get_pixel(10, 10).0[0], 0);
        assert_eq!(map.edges.get_pixel(6, 6).0[0], EDGE);
    }

    #[test]
    fn high_threshold_above_all_gradients_drops_everything() {
        // A faint square: contrast 40 keeps the Sobel magnitude well under 255.
        let img = GrayImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Luma([140])
            } else {
                Luma([100])
            }
        });
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 254, 255);
        assert_eq!(map.candidates, 28);
        assert_eq!(count_edges(&map), 0);
    }

    #[test]
    fn weak_pixels_connected_to_strong_are_promoted() {
        // Contrast 60: mid-side rim pixels score 4 * 60 = 240, corners
        // score 180 * sqrt(2) ~ 254.6.
        let img = GrayImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Luma([160])
            } else {
                Luma([100])
            }
        });
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 1, 250);
        assert_eq!(map.strong, 4);
        assert_eq!(map.promoted, 24);
        assert_eq!(count_edges(&map), 28);
    }

    #[test]
    fn isolated_weak_pixels_are_dropped() {
        let img = GrayImage::from_fn(20, 20, |x, y| {
            if (6..14).contains(&x) && (6..14).contains(&y) {
                Luma([160])
            } else {
                Luma([100])
            }
        });
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        // No rim pixel reaches 255, so nothing seeds the search.
        let map = detect_edges(&img, &mask, 1, 255);
        assert_eq!(map.strong, 0);
        assert_eq!(count_edges(&map), 0);
    }

    #[test]
    fn foreground_on_the_frame_closes_along_it() {
        // Two-pixel foreground band on the left border.
        let img = GrayImage::from_fn(10, 10, |x, _| if x < 2 { Luma([255]) } else { Luma([0]) });
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 50, 150);
        // x=1 touches background and is strong; x=0 has a flat gradient
        // but borders the outside and joins through x=1.
        assert_eq!(map.candidates, 20);
        for y in 0..10 {
            assert_eq!(map.edges.get_pixel(1, y).0[0], EDGE);
            assert_eq!(map.edges.get_pixel(0, y).0[0], EDGE);
        }
        assert_eq!(map.strong, 10);
        assert_eq!(map.promoted, 10);
    }

    #[test]
    fn frame_pixels_without_a_strong_neighbour_are_dropped() {
        // All foreground: the frame is the only rim and nothing is strong.
        let mask = GrayImage::from_pixel(8, 8, Luma([FOREGROUND]));
        let flat = GrayImage::from_pixel(8, 8, Luma([200]));
        let map = detect_edges(&flat, &mask, 50, 150);
        assert_eq!(map.candidates, 28);
        assert_eq!(count_edges(&map), 0);
    }

    #[test]
    fn output_dimensions_match_input() {
        let img = GrayImage::new(17, 31);
        let mask = binarize(&img, Polarity::BrightOnDark).mask;
        let map = detect_edges(&img, &mask, 50, 150);
        assert_eq!(map.edges.dimensions(), (17, 31));
    }
}
