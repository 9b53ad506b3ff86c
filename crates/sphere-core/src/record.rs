//! Per-controller tracking state

use crate::color::bgr_to_hsv;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference to a controller, supplied by the caller (analogous to a
/// move handle over a paired device). Equality and hashing are on the
/// wrapped value only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub u32);

impl ControllerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a controller as seen by the tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    NotCalibrated,
    Calibrated,
    Tracking,
}

/// The per-controller tracking record.
///
/// `e_hsv` is always `bgr_to_hsv(e_bgr)`; the only way to change the current
/// color estimate is [`ControllerRecord::set_color`], which keeps both in
/// lockstep. The same holds for `e_first_bgr`/`e_first_hsv`, set once at
/// construction.
#[derive(Debug, Clone)]
pub struct ControllerRecord {
    pub id: ControllerId,
    pub assigned_rgb: [u8; 3],

    e_first_bgr: [f64; 3],
    e_first_hsv: [f64; 3],
    e_bgr: [f64; 3],
    e_hsv: [f64; 3],

    /// Smoothed image-plane center, in pixels.
    pub x: f64,
    pub y: f64,
    /// Last raw mass-center, in pixels.
    pub mx: i32,
    pub my: i32,
    /// Current and smoothed radius, in pixels.
    pub r: f64,
    pub rs: f64,

    pub roi_x: i32,
    pub roi_y: i32,
    pub roi_level: usize,
    pub search_quadrant: u8,

    pub q1: f64,
    pub q2: f64,
    pub q3: f64,

    pub is_tracked: bool,
    pub last_color_update: Option<DateTime<Utc>>,
}

impl ControllerRecord {
    /// Construct a freshly calibrated record. `e_first` is the color
    /// signature observed during calibration; the current estimate starts
    /// out equal to it.
    pub fn new(id: ControllerId, assigned_rgb: [u8; 3], e_first_bgr: [f64; 3]) -> Self {
        let hsv = bgr_to_hsv(e_first_bgr);
        Self {
            id,
            assigned_rgb,
            e_first_bgr,
            e_first_hsv: hsv,
            e_bgr: e_first_bgr,
            e_hsv: hsv,
            x: 0.0,
            y: 0.0,
            mx: 0,
            my: 0,
            r: 0.0,
            rs: 0.0,
            roi_x: 0,
            roi_y: 0,
            roi_level: 0,
            search_quadrant: 0,
            q1: 0.0,
            q2: 0.0,
            q3: 0.0,
            is_tracked: false,
            last_color_update: None,
        }
    }

    pub fn e_first_bgr(&self) -> [f64; 3] {
        self.e_first_bgr
    }

    pub fn e_first_hsv(&self) -> [f64; 3] {
        self.e_first_hsv
    }

    pub fn e_bgr(&self) -> [f64; 3] {
        self.e_bgr
    }

    pub fn e_hsv(&self) -> [f64; 3] {
        self.e_hsv
    }

    /// Update the current color estimate, recomputing `e_hsv` from `e_bgr`
    /// so `e_hsv` always matches `e_bgr` exactly.
    pub fn set_color(&mut self, bgr: [f64; 3]) {
        self.e_bgr = bgr;
        self.e_hsv = bgr_to_hsv(bgr);
    }

    /// Revert the current color estimate back to the one observed at
    /// calibration time (used as a drift guard during color adaptation).
    pub fn revert_color_to_first(&mut self) {
        self.e_bgr = self.e_first_bgr;
        self.e_hsv = self.e_first_hsv;
    }

    pub fn status(&self) -> Status {
        if self.is_tracked {
            Status::Tracking
        } else {
            Status::Calibrated
        }
    }
}
