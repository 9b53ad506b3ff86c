//! Calibration and tracking algorithms: blink-difference color
//! calibration, HSV-range blob detection, adaptive smoothing, quality
//! scoring, and pin-hole distance estimation.
//!
//! Pixel-level image operations (color conversion, morphology, contour
//! extraction) live behind the `opencv` feature; everything else — the
//! quality/radius/distance/smoothing math and the blink cross-check — is
//! plain Rust and exercised directly in unit tests.

pub mod blink;
pub mod detector;
pub mod distance;
pub mod error;
pub mod quality;
pub mod radius;

pub use blink::{
    cross_check, detect_via_hsv_band, diff_mask, hue_mismatch, largest_contour_mask, mean_bgr_in_mask, BinaryMask,
    CrossCheckSample,
};
pub use detector::{DetectionOutcome, DetectionStats, SphereDetector};
pub use distance::estimate_distance_mm;
pub use error::{VisionError, VisionResult};
pub use quality::{accept, score, smooth_radius, smooth_xy, QualityScores};
pub use radius::{chord_stride, max_chord_radius, ChordEstimate};
