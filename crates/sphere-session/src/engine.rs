//! Pure per-controller tracking step: given the current record, its ROI,
//! and whatever the detector found this frame (or nothing), update the
//! record's position, radius, quality scores and ROI for the next frame.
//!
//! Factored out from the camera-facing `Tracker::update` so it can be
//! driven directly by a test harness with synthetic detections, the same
//! way the tracker's full state machine is exercised elsewhere without a
//! real camera.

use chrono::Utc;
use sphere_core::{ControllerRecord, Point, Rect, TrackerConfig};
use sphere_vision::{accept, chord_stride, max_chord_radius, score, smooth_radius, smooth_xy, DetectionOutcome};

/// The four pyramid levels' fixed `(width, height)`, computed once the
/// frame size is known.
#[derive(Debug, Clone, Copy)]
pub struct RoiPyramid {
    sizes: [(i32, i32); 4],
}

impl RoiPyramid {
    pub fn new(frame_w: i32, frame_h: i32) -> Self {
        Self { sizes: sphere_core::roi_pyramid_sizes(frame_w, frame_h) }
    }

    pub fn size_for_level(&self, level: usize) -> (i32, i32) {
        self.sizes[level.min(3)]
    }

    /// Smallest-buffer level (highest index) whose side is still at least
    /// `needed_side`; falls back to the largest level if none is big
    /// enough.
    pub fn level_for_side(&self, needed_side: i32) -> usize {
        for level in (0..4).rev() {
            if self.sizes[level].0 >= needed_side {
                return level;
            }
        }
        0
    }
}

/// Corner origins visited by the quadrant sweep, in fixed order: TL, TR,
/// BR, BL.
fn quadrant_origin(quadrant: u8, frame_w: i32, frame_h: i32, roi_w: i32, roi_h: i32) -> (i32, i32) {
    match quadrant % 4 {
        0 => (0, 0),
        1 => (frame_w - roi_w, 0),
        2 => (frame_w - roi_w, frame_h - roi_h),
        _ => (0, frame_h - roi_h),
    }
}

/// Run one tracking step for `record`, given the ROI it was searched in
/// this frame and whatever the detector returned from that crop. Returns
/// whether the sphere was found. Mutates `record` in place (position,
/// radius, ROI, quality scores, color signature).
pub fn step(
    record: &mut ControllerRecord,
    roi: Rect,
    pyramid: &RoiPyramid,
    config: &TrackerConfig,
    frame_w: i32,
    frame_h: i32,
    outcome: Option<&DetectionOutcome>,
) -> bool {
    let Some(out) = outcome else {
        return recover(record, roi, pyramid, frame_w, frame_h);
    };

    let new_mx = out.mass_center.0 + roi.x as f64;
    let new_my = out.mass_center.1 + roi.y as f64;
    let old_mass = (record.mx as f64, record.my as f64);
    let new_mass = (new_mx, new_my);

    let stride = chord_stride(out.contour_points.len());
    let chord = max_chord_radius(&out.contour_points, stride);
    let candidate = (chord.center.0 + roi.x as f64, chord.center.1 + roi.y as f64);

    let r_old = record.r;
    let r = smooth_radius(record.rs, chord.radius, config.adaptive_z);
    record.rs = r;
    record.r = r;

    let (x, y) = smooth_xy((record.x, record.y), old_mass, new_mass, candidate, config.adaptive_xy);
    record.x = x;
    record.y = y;
    record.mx = new_mx.round() as i32;
    record.my = new_my.round() as i32;

    let scores = score(out.mask_pixel_count, r_old, r, record.search_quadrant);
    record.q1 = scores.q1;
    record.q2 = scores.q2;
    record.q3 = scores.q3;

    let mut found = accept(scores, config.q1_min, config.q2_max, config.q3_min);

    if scores.q1 > config.snap_q1 {
        record.x = record.mx as f64;
        record.y = record.my as f64;
    }

    if found {
        try_adapt_color(record, config, scores.q1, scores.q2, scores.q3, out.mean_bgr_in_mask, &mut found);
    }

    // No contour, or the candidate was rejected (quality gate or drift-revert):
    // widen the ROI / advance the quadrant sweep exactly as a missing
    // detection would, per §4.4(d).
    if !found {
        return recover(record, roi, pyramid, frame_w, frame_h);
    }

    let (bw, bh) = bounding_rect_size(&out.contour_points);
    let side = (3.0 * (bw.max(bh)) as f64).round() as i32;
    record.roi_level = pyramid.level_for_side(side);
    let (next_w, next_h) = pyramid.size_for_level(record.roi_level);
    let next = Rect::new(
        (record.x - next_w as f64 / 2.0).round() as i32,
        (record.y - next_h as f64 / 2.0).round() as i32,
        next_w,
        next_h,
    )
    .clamped(frame_w, frame_h);
    record.roi_x = next.x;
    record.roi_y = next.y;
    record.search_quadrant = 0;

    record.is_tracked = true;
    true
}

/// Width/height of the axis-aligned bounding rect of `points`, in whatever
/// coordinate space they're given (ROI-local here). `(0, 0)` for an empty
/// contour.
fn bounding_rect_size(points: &[Point]) -> (i32, i32) {
    let Some(&(x0, y0)) = points.first() else {
        return (0, 0);
    };
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (x0, x0, y0, y0);
    for &(x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    (max_x - min_x, max_y - min_y)
}

fn try_adapt_color(
    record: &mut ControllerRecord,
    config: &TrackerConfig,
    q1: f64,
    q2: f64,
    q3: f64,
    mean_bgr_in_mask: [f64; 3],
    found: &mut bool,
) {
    if config.color_update_rate_secs <= 0.0 {
        return;
    }
    let due = match record.last_color_update {
        None => true,
        Some(last) => (Utc::now() - last).num_milliseconds() as f64 >= config.color_update_rate_secs * 1000.0,
    };
    if !due || q1 <= config.color_adapt_q1_min || q2 >= config.color_adapt_q2_max || q3 <= config.color_adapt_q3_min {
        return;
    }

    let blended = [
        0.5 * (record.e_bgr()[0] + mean_bgr_in_mask[0]),
        0.5 * (record.e_bgr()[1] + mean_bgr_in_mask[1]),
        0.5 * (record.e_bgr()[2] + mean_bgr_in_mask[2]),
    ];
    record.set_color(blended);
    record.last_color_update = Some(Utc::now());

    if sphere_core::color::hsv_diff(record.e_first_hsv(), record.e_hsv()) > config.color_adapt_hsv_diff_max {
        record.revert_color_to_first();
        *found = false;
    }
}

/// No contour found, or the candidate was rejected: widen the ROI one
/// level at a time; once at the coarsest level, advance the quadrant
/// sweep instead.
fn recover(record: &mut ControllerRecord, roi: Rect, pyramid: &RoiPyramid, frame_w: i32, frame_h: i32) -> bool {
    if record.roi_level > 0 {
        record.roi_level -= 1;
        let (w, h) = pyramid.size_for_level(record.roi_level);
        let next = Rect::new(roi.x + roi.width / 2 - w / 2, roi.y + roi.height / 2 - h / 2, w, h)
            .clamped(frame_w, frame_h);
        record.roi_x = next.x;
        record.roi_y = next.y;
    } else {
        let (w, h) = pyramid.size_for_level(0);
        let origin = quadrant_origin(record.search_quadrant, frame_w, frame_h, w, h);
        record.roi_x = origin.0;
        record.roi_y = origin.1;
        record.roi_level = 0;
        record.search_quadrant = record.search_quadrant.wrapping_add(1) % 4;
    }
    record.is_tracked = false;
    false
}

/// Propose a recentered ROI origin from a fresh detection inside the
/// current ROI, active only when `fps_ewma` exceeds the configured
/// threshold. Returns `None` when the gate is closed or nothing was
/// detected.
pub fn recenter(
    fps_ewma: f64,
    config: &TrackerConfig,
    roi: Rect,
    outcome: Option<&DetectionOutcome>,
) -> Option<(i32, i32)> {
    if fps_ewma <= config.roi_recenter_fps_threshold {
        return None;
    }
    let out = outcome?;
    let shift_x = out.mass_center.0 - roi.width as f64 / 2.0;
    let shift_y = out.mass_center.1 - roi.height as f64 / 2.0;
    Some((roi.x + shift_x.round() as i32, roi.y + shift_y.round() as i32))
}
