//! Pin-hole distance estimator.

const EPS: f64 = 1.0e-6;

/// `dist_mm = (focal_deg * sphere_diameter_mm * user_factor) /
/// (blob_diameter_px * sensor_pixel_height_um / 100 + eps)`.
///
/// Preserved bit-identically, including the epsilon guard that keeps the
/// denominator finite at `blob_diameter_px == 0`.
pub fn estimate_distance_mm(
    blob_diameter_px: f64,
    focal_deg: f64,
    sphere_diameter_mm: f64,
    sensor_pixel_height_um: f64,
    user_distance_factor: f64,
) -> f64 {
    let numerator = focal_deg * sphere_diameter_mm * user_distance_factor;
    let denominator = blob_diameter_px * sensor_pixel_height_um / 100.0 + EPS;
    numerator / denominator
}
