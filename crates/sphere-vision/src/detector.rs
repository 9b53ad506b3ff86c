//! HSV-range blob detection within a region of interest.
//!
//! The real pixel processing (color conversion, in-range thresholding,
//! contour extraction) only exists under the `opencv` feature; without it
//! the detector is a stub that finds nothing, so the rest of the tracking
//! engine stays fully unit-testable.

use sphere_core::{Point, Rect};

use crate::error::VisionResult;

/// What `SphereDetector::detect_in_roi` found, expressed purely in terms
/// the quality/radius math in [`crate::quality`] and [`crate::radius`]
/// already knows how to consume.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// Contour points of the largest blob, in ROI-local pixel coordinates.
    pub contour_points: Vec<Point>,
    /// Count of mask pixels belonging to the filled contour.
    pub mask_pixel_count: u32,
    /// Mass center of the filled mask (image moments m10/m00, m01/m00), in
    /// ROI-local pixel coordinates.
    pub mass_center: (f64, f64),
    /// Mean BGR of the source frame restricted to the mask, used for color
    /// adaptation.
    pub mean_bgr_in_mask: [f64; 3],
}

#[derive(Debug, Default, Clone)]
pub struct DetectionStats {
    pub frames_processed: u64,
    pub detections_found: u64,
}

pub struct SphereDetector {
    stats: DetectionStats,
}

impl SphereDetector {
    pub fn new() -> Self {
        Self { stats: DetectionStats::default() }
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    /// Crop `frame` to `roi`, convert to HSV, in-range filter against
    /// `color_hsv ± band`, and return the largest contour found.
    #[cfg(feature = "opencv")]
    pub fn detect_in_roi(
        &mut self,
        frame: &opencv::core::Mat,
        roi: Rect,
        color_hsv: [f64; 3],
        band: [f64; 3],
    ) -> VisionResult<Option<DetectionOutcome>> {
        use opencv::{
            core::{self, Mat, Scalar, Vector},
            imgproc,
            prelude::*,
        };

        self.stats.frames_processed += 1;

        let rect = core::Rect::new(roi.x, roi.y, roi.width, roi.height);
        let cropped = Mat::roi(frame, rect)?;

        let mut hsv = Mat::default();
        imgproc::cvt_color(&cropped, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

        let lower = Scalar::new(
            (color_hsv[0] - band[0]).max(0.0),
            (color_hsv[1] - band[1]).max(0.0),
            (color_hsv[2] - band[2]).max(0.0),
            0.0,
        );
        let upper = Scalar::new(
            (color_hsv[0] + band[0]).min(179.0),
            (color_hsv[1] + band[1]).min(255.0),
            (color_hsv[2] + band[2]).min(255.0),
            0.0,
        );

        let mut mask = Mat::default();
        core::in_range(&hsv, &lower, &upper, &mut mask)?;

        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            core::Size::new(5, 5),
            core::Point::new(3, 3),
        )?;
        let mut cleaned = Mat::default();
        imgproc::erode(
            &mask,
            &mut cleaned,
            &kernel,
            core::Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        let mut opened = Mat::default();
        imgproc::dilate(
            &cleaned,
            &mut opened,
            &kernel,
            core::Point::new(-1, -1),
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        let mut contours = Vector::<Vector<core::Point>>::new();
        imgproc::find_contours(
            &opened,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            core::Point::new(0, 0),
        )?;

        let largest = contours
            .iter()
            .max_by(|a, b| {
                let area_a = imgproc::contour_area(a, false).unwrap_or(0.0);
                let area_b = imgproc::contour_area(b, false).unwrap_or(0.0);
                area_a.partial_cmp(&area_b).unwrap_or(std::cmp::Ordering::Equal)
            });

        let Some(contour) = largest else {
            return Ok(None);
        };

        let mut filled_mask = Mat::zeros(opened.rows(), opened.cols(), core::CV_8UC1)?.to_mat()?;
        let mut single = Vector::<Vector<core::Point>>::new();
        single.push(contour.clone());
        imgproc::draw_contours(
            &mut filled_mask,
            &single,
            0,
            Scalar::new(255.0, 0.0, 0.0, 0.0),
            -1,
            imgproc::LINE_8,
            &core::no_array(),
            i32::MAX,
            core::Point::new(0, 0),
        )?;

        let mask_pixel_count = core::count_non_zero(&filled_mask)? as u32;
        let mean = core::mean(&cropped, &filled_mask)?;
        let mean_bgr_in_mask = [mean[0], mean[1], mean[2]];

        let moments = imgproc::moments(&filled_mask, true)?;
        let mass_center = if moments.m00 > 0.0 {
            (moments.m10 / moments.m00, moments.m01 / moments.m00)
        } else {
            (0.0, 0.0)
        };

        let contour_points: Vec<Point> = contour.iter().map(|p| (p.x, p.y)).collect();

        self.stats.detections_found += 1;
        Ok(Some(DetectionOutcome { contour_points, mask_pixel_count, mass_center, mean_bgr_in_mask }))
    }

    #[cfg(not(feature = "opencv"))]
    pub fn detect_in_roi(
        &mut self,
        _frame: &(),
        _roi: Rect,
        _color_hsv: [f64; 3],
        _band: [f64; 3],
    ) -> VisionResult<Option<DetectionOutcome>> {
        self.stats.frames_processed += 1;
        Ok(None)
    }
}

impl Default for SphereDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_at_zero() {
        let detector = SphereDetector::new();
        assert_eq!(detector.stats().frames_processed, 0);
        assert_eq!(detector.stats().detections_found, 0);
    }
}
