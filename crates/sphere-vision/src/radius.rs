//! Radius-by-max-chord estimation over a contour point list.
//!
//! Pure geometry, independent of whatever produced the point list (a real
//! contour extractor under the `opencv` feature, or a synthetic list in
//! tests), so it is exercised without any image library.

use sphere_core::{dist_sq, Point};

/// Estimated center and radius of the largest inscribed chord of `points`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChordEstimate {
    pub center: (f64, f64),
    pub radius: f64,
}

/// Scan `points` with the given stride, find the pair of maximum squared
/// distance, and return the midpoint and half-distance as the radius
/// estimate. Returns radius 0 for a degenerate (0 or 1 point) contour and
/// never panics on an empty list.
pub fn max_chord_radius(points: &[Point], stride: usize) -> ChordEstimate {
    if points.len() < 2 {
        let center = points.first().map(|&(x, y)| (x as f64, y as f64)).unwrap_or((0.0, 0.0));
        return ChordEstimate { center, radius: 0.0 };
    }

    let stride = stride.max(1);
    let sampled: Vec<Point> = points.iter().step_by(stride).copied().collect();

    let mut best_sq = 0.0_f64;
    let mut best_pair = (sampled[0], sampled[0]);
    for i in 0..sampled.len() {
        for j in (i + 1)..sampled.len() {
            let a = (sampled[i].0 as f64, sampled[i].1 as f64);
            let b = (sampled[j].0 as f64, sampled[j].1 as f64);
            let d = dist_sq(a, b);
            if d > best_sq {
                best_sq = d;
                best_pair = (sampled[i], sampled[j]);
            }
        }
    }

    let (a, b) = best_pair;
    let center = ((a.0 + b.0) as f64 / 2.0, (a.1 + b.1) as f64 / 2.0);
    ChordEstimate { center, radius: best_sq.sqrt() / 2.0 }
}

/// Stride used when scanning a contour for the max-chord pair: roughly one
/// in twenty points, never less than one.
pub fn chord_stride(total_points: usize) -> usize {
    (total_points / 20).max(1)
}
