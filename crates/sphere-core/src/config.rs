//! Tuning constants for the tracking pipeline, gathered into one
//! serializable struct so deployments can override them from a config file
//! without touching code.

use serde::{Deserialize, Serialize};

/// All tunable thresholds and physical constants used by calibration,
/// tracking and distance estimation.
///
/// Field names mirror the tuning quantities used elsewhere rather than inventing new
/// vocabulary; defaults match the values given there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Whether the Z-axis (radius) smoothing blend factor is data-dependent
    /// rather than a fixed constant.
    pub adaptive_z: bool,
    /// Whether the XY smoothing blend factor is data-dependent rather than
    /// a fixed constant.
    pub adaptive_xy: bool,

    /// Frame rate above which the ROI is recentered every frame instead of
    /// only on loss.
    pub roi_recenter_fps_threshold: f64,

    /// Minimum pixel-ratio quality (q1) to accept a candidate detection.
    pub q1_min: f64,
    /// Maximum fractional radius change (q2) to accept a candidate
    /// detection.
    pub q2_max: f64,
    /// Minimum radius in pixels (q3) to accept a candidate detection.
    pub q3_min: f64,

    /// q1 at or above which the sphere center snaps directly to the blob's
    /// mass center instead of being smoothed.
    pub snap_q1: f64,

    /// q1 at or above which online color adaptation is considered.
    pub color_adapt_q1_min: f64,
    /// q2 at or below which online color adaptation is considered.
    pub color_adapt_q2_max: f64,
    /// q3 at or above which online color adaptation is considered.
    pub color_adapt_q3_min: f64,
    /// Maximum allowed HSV drift (see `color::hsv_diff`) from the
    /// calibration-time signature before the adapted color is reverted.
    pub color_adapt_hsv_diff_max: f64,
    /// Minimum elapsed time between two online color updates for the same
    /// controller.
    pub color_update_rate_secs: f64,

    /// Number of LED on/off cycles performed during calibration.
    pub calib_blinks: u32,
    /// Delay between toggling the LED and capturing a frame during
    /// calibration.
    pub calib_blink_delay_ms: u64,
    /// Minimum absolute per-pixel frame difference to count as "lit" during
    /// blink-differencing.
    pub calib_diff_threshold: u8,
    /// Minimum blob area (in pixels) for a blink difference to be
    /// considered a candidate sphere.
    pub calib_min_blob_size: f64,
    /// Maximum allowed coefficient of variation in blob size across the
    /// blink cycles.
    pub calib_max_blob_std_pct: f64,
    /// Maximum allowed centroid displacement (pixels) across the blink
    /// cycles.
    pub calib_max_displacement_px: f64,
    /// Morphological erode/dilate kernel size used when cleaning the
    /// blink-difference mask.
    pub calib_kernel_size: u32,

    /// Camera horizontal field of view, in degrees.
    pub focal_deg: f64,
    /// Physical diameter of the illuminated sphere, in millimeters.
    pub sphere_diameter_mm: f64,
    /// Sensor pixel pitch, in micrometers.
    pub sensor_pixel_height_um: f64,
    /// Empirical correction factor applied to the raw pin-hole distance
    /// estimate.
    pub user_distance_factor: f64,

    /// Brightness divisor applied to the LED color while calibrating, to
    /// avoid saturating the sensor.
    pub led_dim_factor: u8,
    /// Camera exposure value considered "good" for calibration; used only
    /// as a diagnostic hint, never enforced.
    pub good_exposure: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            adaptive_z: true,
            adaptive_xy: true,

            roi_recenter_fps_threshold: 160.0,

            q1_min: 0.3,
            q2_max: 0.7,
            q3_min: 4.0,

            snap_q1: 0.85,

            color_adapt_q1_min: 0.8,
            color_adapt_q2_max: 0.2,
            color_adapt_q3_min: 6.0,
            color_adapt_hsv_diff_max: 35.0,
            color_update_rate_secs: 1.0,

            calib_blinks: 4,
            calib_blink_delay_ms: 50,
            calib_diff_threshold: 20,
            calib_min_blob_size: 50.0,
            calib_max_blob_std_pct: 0.10,
            calib_max_displacement_px: 30.0,
            calib_kernel_size: 5,

            focal_deg: 28.3,
            sphere_diameter_mm: 47.0,
            sensor_pixel_height_um: 5.0,
            user_distance_factor: 1.05,

            led_dim_factor: 1,
            good_exposure: 2051,
        }
    }
}

/// Name of the environment variable used to select the capture device.
pub const CAMERA_INDEX_ENV: &str = "PSMOVE_TRACKER_CAMERA";

/// Read the camera index from `PSMOVE_TRACKER_CAMERA`, falling back to `0`
/// if the variable is unset or does not parse as a non-negative integer.
/// Never panics: a misconfigured environment should not bring the process
/// down before a single frame has been captured.
pub fn camera_index_from_env() -> i32 {
    std::env::var(CAMERA_INDEX_ENV)
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|v| *v >= 0)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_constants() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.q1_min, 0.3);
        assert_eq!(cfg.q2_max, 0.7);
        assert_eq!(cfg.q3_min, 4.0);
        assert_eq!(cfg.snap_q1, 0.85);
        assert_eq!(cfg.calib_blinks, 4);
        assert_eq!(cfg.sphere_diameter_mm, 47.0);
    }

    #[test]
    fn camera_index_falls_back_on_missing_or_bad_value() {
        std::env::remove_var(CAMERA_INDEX_ENV);
        assert_eq!(camera_index_from_env(), 0);

        std::env::set_var(CAMERA_INDEX_ENV, "not-a-number");
        assert_eq!(camera_index_from_env(), 0);

        std::env::set_var(CAMERA_INDEX_ENV, "-1");
        assert_eq!(camera_index_from_env(), 0);

        std::env::set_var(CAMERA_INDEX_ENV, "2");
        assert_eq!(camera_index_from_env(), 2);

        std::env::remove_var(CAMERA_INDEX_ENV);
    }
}
