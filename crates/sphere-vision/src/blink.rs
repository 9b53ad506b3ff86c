//! Blink-difference frame math used during calibration.
//!
//! Like [`crate::detector`], the actual pixel processing is gated behind
//! the `opencv` feature; the accept/reject decision logic below — mask
//! intersection and the cross-blink consistency check — operates on plain
//! data, so it is testable without a frame.

use crate::error::VisionResult;

/// A binary mask over a rectangular frame region, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<bool>,
}

impl BinaryMask {
    pub fn get(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return false;
        }
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn count_nonzero(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }

    /// Pixelwise AND of every mask in `masks`; `None` if the slice is
    /// empty or the masks don't all share the same dimensions.
    pub fn intersect(masks: &[BinaryMask]) -> Option<BinaryMask> {
        let first = masks.first()?;
        let (width, height) = (first.width, first.height);
        if masks.iter().any(|m| m.width != width || m.height != height) {
            return None;
        }
        let mut pixels = vec![true; (width * height) as usize];
        for m in masks {
            for (dst, &src) in pixels.iter_mut().zip(m.pixels.iter()) {
                *dst = *dst && src;
            }
        }
        Some(BinaryMask { width, height, pixels })
    }
}

/// One re-detected contour from the cross-check pass: its pixel area and
/// bounding-rect top-left, both in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossCheckSample {
    pub blob_size: f64,
    pub top_left: (i32, i32),
}

/// Greyscale on/off difference for one blink cycle, thresholded at
/// `diff_threshold` and cleaned with a `kernel_size` square erode+dilate.
#[cfg(feature = "opencv")]
pub fn diff_mask(
    on_frame: &opencv::core::Mat,
    off_frame: &opencv::core::Mat,
    diff_threshold: u8,
    kernel_size: u32,
) -> VisionResult<BinaryMask> {
    use opencv::{core::Mat, imgproc, prelude::*};

    let mut grey_on = Mat::default();
    let mut grey_off = Mat::default();
    imgproc::cvt_color(on_frame, &mut grey_on, imgproc::COLOR_BGR2GRAY, 0)?;
    imgproc::cvt_color(off_frame, &mut grey_off, imgproc::COLOR_BGR2GRAY, 0)?;

    let mut diff = Mat::default();
    opencv::core::absdiff(&grey_on, &grey_off, &mut diff)?;

    let mut binary = Mat::default();
    imgproc::threshold(&diff, &mut binary, diff_threshold as f64, 255.0, imgproc::THRESH_BINARY)?;

    let cleaned = morphology_close(&binary, kernel_size)?;
    mat_to_mask(&cleaned)
}

#[cfg(not(feature = "opencv"))]
pub fn diff_mask(
    _on_frame: &(),
    _off_frame: &(),
    _diff_threshold: u8,
    _kernel_size: u32,
) -> VisionResult<BinaryMask> {
    Ok(BinaryMask { width: 0, height: 0, pixels: Vec::new() })
}

/// Largest connected component of `mask`, with every other pixel cleared.
#[cfg(feature = "opencv")]
pub fn largest_contour_mask(mask: &BinaryMask) -> VisionResult<BinaryMask> {
    use opencv::{core, imgproc, prelude::*};

    let mat = mask_to_mat(mask)?;
    let mut contours = core::Vector::<core::Vector<core::Point>>::new();
    imgproc::find_contours(&mat, &mut contours, imgproc::RETR_EXTERNAL, imgproc::CHAIN_APPROX_SIMPLE, core::Point::new(0, 0))?;

    let largest = contours.iter().max_by(|a, b| {
        let area_a = imgproc::contour_area(a, false).unwrap_or(0.0);
        let area_b = imgproc::contour_area(b, false).unwrap_or(0.0);
        area_a.partial_cmp(&area_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let Some(contour) = largest else {
        return Ok(BinaryMask { width: mask.width, height: mask.height, pixels: vec![false; (mask.width * mask.height).max(0) as usize] });
    };

    let mut filled = core::Mat::zeros(mask.height, mask.width, core::CV_8UC1)?.to_mat()?;
    let mut single = core::Vector::<core::Vector<core::Point>>::new();
    single.push(contour);
    imgproc::draw_contours(
        &mut filled,
        &single,
        0,
        core::Scalar::new(255.0, 0.0, 0.0, 0.0),
        -1,
        imgproc::LINE_8,
        &core::no_array(),
        i32::MAX,
        core::Point::new(0, 0),
    )?;
    mat_to_mask(&filled)
}

#[cfg(not(feature = "opencv"))]
pub fn largest_contour_mask(mask: &BinaryMask) -> VisionResult<BinaryMask> {
    Ok(mask.clone())
}

/// Mean BGR of `frame` restricted to `mask`.
#[cfg(feature = "opencv")]
pub fn mean_bgr_in_mask(frame: &opencv::core::Mat, mask: &BinaryMask) -> VisionResult<[f64; 3]> {
    let cv_mask = mask_to_mat(mask)?;
    let mean = opencv::core::mean(frame, &cv_mask)?;
    Ok([mean[0], mean[1], mean[2]])
}

#[cfg(not(feature = "opencv"))]
pub fn mean_bgr_in_mask(_frame: &(), _mask: &BinaryMask) -> VisionResult<[f64; 3]> {
    Ok([0.0, 0.0, 0.0])
}

/// Re-detect a blob in `frame` by filtering to `hsv_center ± hsv_band`,
/// the same in-range/morphology/largest-contour steps as
/// [`crate::detector::SphereDetector::detect_in_roi`] but over the whole
/// frame instead of a cropped ROI, for the §4.3.5 cross-check.
#[cfg(feature = "opencv")]
pub fn detect_via_hsv_band(
    frame: &opencv::core::Mat,
    hsv_center: [f64; 3],
    hsv_band: [f64; 3],
    kernel_size: u32,
) -> VisionResult<Option<CrossCheckSample>> {
    use opencv::{core::{self, Mat, Scalar}, imgproc, prelude::*};

    let mut hsv = Mat::default();
    imgproc::cvt_color(frame, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

    let lower = Scalar::new(
        (hsv_center[0] - hsv_band[0]).max(0.0),
        (hsv_center[1] - hsv_band[1]).max(0.0),
        (hsv_center[2] - hsv_band[2]).max(0.0),
        0.0,
    );
    let upper = Scalar::new(
        (hsv_center[0] + hsv_band[0]).min(179.0),
        (hsv_center[1] + hsv_band[1]).min(255.0),
        (hsv_center[2] + hsv_band[2]).min(255.0),
        0.0,
    );
    let mut in_range = Mat::default();
    core::in_range(&hsv, &lower, &upper, &mut in_range)?;

    let cleaned = morphology_close(&in_range, kernel_size)?;

    let mut contours = core::Vector::<core::Vector<core::Point>>::new();
    imgproc::find_contours(&cleaned, &mut contours, imgproc::RETR_EXTERNAL, imgproc::CHAIN_APPROX_SIMPLE, core::Point::new(0, 0))?;

    let largest = contours.iter().max_by(|a, b| {
        let area_a = imgproc::contour_area(a, false).unwrap_or(0.0);
        let area_b = imgproc::contour_area(b, false).unwrap_or(0.0);
        area_a.partial_cmp(&area_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let Some(contour) = largest else {
        return Ok(None);
    };

    let blob_size = imgproc::contour_area(&contour, false)?;
    let bounding = imgproc::bounding_rect(&contour)?;
    Ok(Some(CrossCheckSample { blob_size, top_left: (bounding.x, bounding.y) }))
}

#[cfg(not(feature = "opencv"))]
pub fn detect_via_hsv_band(
    _frame: &(),
    _hsv_center: [f64; 3],
    _hsv_band: [f64; 3],
    _kernel_size: u32,
) -> VisionResult<Option<CrossCheckSample>> {
    Ok(None)
}

#[cfg(feature = "opencv")]
fn morphology_close(binary: &opencv::core::Mat, kernel_size: u32) -> VisionResult<opencv::core::Mat> {
    use opencv::{core, imgproc, prelude::*};

    let kernel = imgproc::get_structuring_element(
        imgproc::MORPH_RECT,
        core::Size::new(kernel_size as i32, kernel_size as i32),
        core::Point::new((kernel_size as i32) / 2, (kernel_size as i32) / 2),
    )?;
    let mut eroded = core::Mat::default();
    imgproc::erode(
        binary,
        &mut eroded,
        &kernel,
        core::Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    let mut dilated = core::Mat::default();
    imgproc::dilate(
        &eroded,
        &mut dilated,
        &kernel,
        core::Point::new(-1, -1),
        1,
        core::BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dilated)
}

#[cfg(feature = "opencv")]
fn mat_to_mask(mat: &opencv::core::Mat) -> VisionResult<BinaryMask> {
    use opencv::prelude::*;

    let (width, height) = (mat.cols(), mat.rows());
    let mut pixels = Vec::with_capacity((width * height).max(0) as usize);
    for y in 0..height {
        for x in 0..width {
            let v: u8 = *mat.at_2d(y, x)?;
            pixels.push(v > 0);
        }
    }
    Ok(BinaryMask { width, height, pixels })
}

#[cfg(feature = "opencv")]
fn mask_to_mat(mask: &BinaryMask) -> VisionResult<opencv::core::Mat> {
    use opencv::{core, prelude::*};

    let mut mat = core::Mat::zeros(mask.height, mask.width, core::CV_8UC1)?.to_mat()?;
    for y in 0..mask.height {
        for x in 0..mask.width {
            if mask.get(x, y) {
                *mat.at_2d_mut::<u8>(y, x)? = 255;
            }
        }
    }
    Ok(mat)
}

/// Cross-blink consistency check: every sample must be present, have
/// `blob_size > min_blob_size`, and a displacement from the first
/// sample's top-left within `max_displacement_px`; the standard
/// deviation of sizes must be at most `max_std_pct` of their mean.
pub fn cross_check(
    samples: &[Option<CrossCheckSample>],
    min_blob_size: f64,
    max_displacement_px: f64,
    max_std_pct: f64,
) -> bool {
    if samples.iter().any(|a| a.is_none()) {
        return false;
    }
    let samples: Vec<CrossCheckSample> = samples.iter().map(|a| a.unwrap()).collect();

    let Some(first) = samples.first() else {
        return false;
    };

    for s in &samples {
        if s.blob_size <= min_blob_size {
            return false;
        }
        let dx = (s.top_left.0 - first.top_left.0) as f64;
        let dy = (s.top_left.1 - first.top_left.1) as f64;
        let displacement = (dx * dx + dy * dy).sqrt();
        if displacement > max_displacement_px {
            return false;
        }
    }

    let mean: f64 = samples.iter().map(|s| s.blob_size).sum::<f64>() / samples.len() as f64;
    let variance: f64 = samples.iter().map(|s| (s.blob_size - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    let std_dev = variance.sqrt();

    mean > 0.0 && std_dev <= max_std_pct * mean
}

/// Whether two hues (already in `[0, 180)`) differ by more than `max_delta`
/// — used for the calibration hue sanity warning, which is diagnostic
/// only and never fails calibration.
pub fn hue_mismatch(observed_hue: f64, assigned_hue: f64, max_delta: f64) -> bool {
    let d = (observed_hue - assigned_hue).rem_euclid(180.0);
    let d = if d > 90.0 { 180.0 - d } else { d };
    d > max_delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(size: f64, top_left: (i32, i32)) -> CrossCheckSample {
        CrossCheckSample { blob_size: size, top_left }
    }

    #[test]
    fn scenario_2_size_variance_rejects() {
        let samples = vec![
            Some(sample(100.0, (10, 10))),
            Some(sample(100.0, (10, 10))),
            Some(sample(100.0, (10, 10))),
            Some(sample(250.0, (10, 10))),
        ];
        assert!(!cross_check(&samples, 50.0, 30.0, 0.10));
    }

    #[test]
    fn consistent_blobs_pass_cross_check() {
        let samples = vec![
            Some(sample(100.0, (10, 10))),
            Some(sample(102.0, (12, 11))),
            Some(sample(99.0, (9, 9))),
            Some(sample(101.0, (11, 10))),
        ];
        assert!(cross_check(&samples, 50.0, 30.0, 0.10));
    }

    #[test]
    fn missing_sample_rejects() {
        let samples = vec![Some(sample(100.0, (0, 0))), None, Some(sample(100.0, (0, 0))), Some(sample(100.0, (0, 0)))];
        assert!(!cross_check(&samples, 50.0, 30.0, 0.10));
    }

    #[test]
    fn displacement_too_large_rejects() {
        let samples = vec![
            Some(sample(100.0, (0, 0))),
            Some(sample(100.0, (50, 50))),
            Some(sample(100.0, (0, 0))),
            Some(sample(100.0, (0, 0))),
        ];
        assert!(!cross_check(&samples, 50.0, 30.0, 0.10));
    }

    #[test]
    fn hue_mismatch_detects_large_delta() {
        assert!(hue_mismatch(10.0, 30.0, 12.0));
        assert!(!hue_mismatch(10.0, 15.0, 12.0));
    }

    #[test]
    fn mask_intersection_is_pixelwise_and() {
        let a = BinaryMask { width: 2, height: 1, pixels: vec![true, true] };
        let b = BinaryMask { width: 2, height: 1, pixels: vec![true, false] };
        let intersected = BinaryMask::intersect(&[a, b]).unwrap();
        assert_eq!(intersected.pixels, vec![true, false]);
        assert_eq!(intersected.count_nonzero(), 1);
    }

    #[test]
    fn mask_intersection_rejects_mismatched_dimensions() {
        let a = BinaryMask { width: 2, height: 1, pixels: vec![true, true] };
        let b = BinaryMask { width: 1, height: 2, pixels: vec![true, true] };
        assert!(BinaryMask::intersect(&[a, b]).is_none());
    }
}
