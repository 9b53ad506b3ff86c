//! Pure, opencv-free math: quality scoring and adaptive smoothing.
//!
//! None of this depends on a mask or image representation directly; it
//! consumes the scalar quantities the detector already extracted (pixel
//! count, radius, mass center), which keeps it exercisable from unit tests
//! with synthetic numbers.

const EPS: f64 = 1.0e-6;

/// Result of scoring one frame's candidate detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScores {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

/// `q1 = pixels_in_mask / (pi * r^2)`, halved if the mask has fewer than 20
/// pixels.
pub fn score_q1(pixels_in_mask: u32, r: f64) -> f64 {
    let area = std::f64::consts::PI * r * r;
    let q1 = if area > 0.0 {
        pixels_in_mask as f64 / area
    } else {
        0.0
    };
    if pixels_in_mask < 20 {
        q1 / 2.0
    } else {
        q1
    }
}

/// `q2 = |r_old - r| / (r_old + eps)`, only meaningful when `r_old > 0` and
/// the controller is not mid quadrant-sweep (`search_quadrant == 0`);
/// otherwise the caller should skip the `q2 < q2_max` acceptance check
/// entirely rather than evaluate this function.
pub fn score_q2(r_old: f64, r: f64) -> f64 {
    (r_old - r).abs() / (r_old + EPS)
}

/// `q3 = r`, a minimum-radius proxy.
pub fn score_q3(r: f64) -> f64 {
    r
}

pub fn score(pixels_in_mask: u32, r_old: f64, r: f64, search_quadrant: u8) -> QualityScores {
    let q1 = score_q1(pixels_in_mask, r);
    let q2 = if r_old > 0.0 && search_quadrant == 0 {
        score_q2(r_old, r)
    } else {
        f64::INFINITY
    };
    let q3 = score_q3(r);
    QualityScores { q1, q2, q3 }
}

/// Acceptance gate: `q1 > q1_min`, `q3 > q3_min`, and
/// `q2 < q2_max` whenever `q2` was actually evaluated (finite).
pub fn accept(scores: QualityScores, q1_min: f64, q2_max: f64, q3_min: f64) -> bool {
    let q2_ok = !scores.q2.is_finite() || scores.q2 < q2_max;
    scores.q1 > q1_min && scores.q3 > q3_min && q2_ok
}

/// Adaptive exponential blend factor shared by both smoothing axes: grows
/// linearly with the observed change, floored at `0.15`, capped at `1.0`.
fn adaptive_blend(delta: f64, scale: f64) -> f64 {
    (delta / scale + 0.15).min(1.0)
}

/// Z-axis (radius) smoothing. When `adaptive` is false the
/// blend factor is not applied at all; the raw radius passes through
/// unsmoothed, matching a tracker built with `adaptive_z = false`.
pub fn smooth_radius(rs_old: f64, r: f64, adaptive: bool) -> f64 {
    if !adaptive {
        return r;
    }
    let delta_r = (rs_old - r).abs();
    let f = adaptive_blend(delta_r, 4.0);
    rs_old * (1.0 - f) + r * f
}

/// XY smoothing: the blend factor is driven by how far the raw mass center
/// moved between frames (`old_mass` -> `new_mass`), but the position
/// actually blended toward is `candidate` — the max-chord midpoint, a
/// distinct quantity from the mass center. Both quirks are preserved
/// exactly from the tracker this is modeled on.
pub fn smooth_xy(
    prev_xy: (f64, f64),
    old_mass: (f64, f64),
    new_mass: (f64, f64),
    candidate: (f64, f64),
    adaptive: bool,
) -> (f64, f64) {
    if !adaptive {
        return candidate;
    }
    let d = sphere_core::dist(old_mass, new_mass);
    let f = adaptive_blend(d, 7.0);
    (
        prev_xy.0 * (1.0 - f) + candidate.0 * f,
        prev_xy.1 * (1.0 - f) + candidate.1 * f,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q1_full_coverage_circle() {
        let r = 20.0;
        let pixels = (std::f64::consts::PI * r * r).round() as u32;
        let q1 = score_q1(pixels, r);
        assert!((q1 - 1.0).abs() < 0.01);
    }

    #[test]
    fn q1_halved_below_twenty_pixels() {
        let full = score_q1(19, 1.0);
        // without the halving rule this would just be pixels/area
        let unhalved = 19.0 / std::f64::consts::PI;
        assert!((full - unhalved / 2.0).abs() < 1e-9);
    }

    #[test]
    fn q2_infinite_on_quadrant_sweep() {
        let scores = score(500, 20.0, 21.0, 2);
        assert!(scores.q2.is_infinite());
        assert!(accept(scores, 0.3, 0.7, 4.0));
    }

    #[test]
    fn scenario_3_quality_accept() {
        // synthetic r=20 circle, first frame (r_old = 0)
        let r = 20.0;
        let pixels = (std::f64::consts::PI * r * r).round() as u32;
        let scores = score(pixels, 0.0, r, 0);
        assert!((scores.q1 - 1.0).abs() < 0.01);
        assert!(scores.q2.is_infinite());
        assert_eq!(scores.q3, 20.0);
        assert!(accept(scores, 0.3, 0.7, 4.0));
    }

    #[test]
    fn scenario_4_smoothing_blend_near_one() {
        let prev = (100.0, 100.0);
        let old_mass = (100.0, 100.0);
        let new_mass = (120.0, 100.0);
        let candidate = (120.0, 100.0);
        let (x, _y) = smooth_xy(prev, old_mass, new_mass, candidate, true);
        let f = (20.0_f64 / 7.0 + 0.15).min(1.0);
        assert_eq!(f, 1.0);
        assert!((x - 120.0).abs() < 1e-9);
        assert!(x > 100.0 && x <= 120.0);
    }

    #[test]
    fn non_adaptive_smoothing_passes_through() {
        assert_eq!(smooth_radius(10.0, 15.0, false), 15.0);
        assert_eq!(
            smooth_xy((0.0, 0.0), (0.0, 0.0), (5.0, 5.0), (5.0, 5.0), false),
            (5.0, 5.0)
        );
    }
}
