//! Controller calibration: palette allocation, the persisted-signature
//! fast path, and blink-difference capture.

use sphere_core::{
    CameraDriver, CameraSettingsStore, ColorStore, ControllerId, ControllerRecord, LedDriver,
    PersistedSignature, Status,
};

use crate::error::SessionResult;
use crate::tracker::{store_key, Tracker};

fn dim(rgb: [u8; 3], factor: u8) -> [u8; 3] {
    if factor <= 1 {
        rgb
    } else {
        [rgb[0] / factor, rgb[1] / factor, rgb[2] / factor]
    }
}

impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
where
    Cam: CameraDriver,
    Led: LedDriver,
    Store: ColorStore,
    Settings: CameraSettingsStore,
{
    /// Calibrate a controller using the first free palette color. A no-op
    /// returning the current status if `id` is already enabled.
    pub fn enable(&mut self, id: ControllerId) -> SessionResult<Status> {
        if self.find(id).is_some() {
            return Ok(self.get_status(id));
        }
        let Some(rgb) = self.palette.pick_free() else {
            return Err(sphere_core::CoreError::PaletteExhausted.into());
        };
        self.enable_with_color(id, rgb[0], rgb[1], rgb[2])
    }

    /// Complete calibration for `id` as if a blink capture had produced
    /// `e_first_bgr`, without touching the camera or LED driver. A seam for
    /// driving the palette/record bookkeeping from a test harness or any
    /// other process that already knows a controller's color signature.
    pub fn simulate_calibration(
        &mut self,
        id: ControllerId,
        rgb: [u8; 3],
        e_first_bgr: [f64; 3],
    ) -> SessionResult<Status> {
        if self.find(id).is_some() {
            return Ok(self.get_status(id));
        }
        let record = ControllerRecord::new(id, rgb, e_first_bgr);
        self.palette.mark(rgb, true);
        let sig = PersistedSignature { assigned_rgb: rgb, e_first_bgr };
        self.color_store.save(&store_key(id), sig)?;
        self.controllers.push(record);
        Ok(Status::Calibrated)
    }
}

#[cfg(feature = "opencv")]
mod opencv_impl {
    use std::thread;
    use std::time::Duration;

    use tracing::{debug, info, warn};

    use sphere_core::{
        CameraDriver, CameraSettingsStore, ColorStore, ControllerId, ControllerRecord, LedDriver,
        PersistedSignature, Rect, Status,
    };
    use sphere_vision::{cross_check, hue_mismatch, BinaryMask, CrossCheckSample};

    use crate::engine;
    use crate::error::{SessionError, SessionResult};
    use crate::tracker::{store_key, Tracker};

    use super::dim;

    impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
    where
        Cam: CameraDriver<Frame = opencv::core::Mat>,
        Led: LedDriver,
        Store: ColorStore,
        Settings: CameraSettingsStore,
    {
        pub fn enable_with_color(&mut self, id: ControllerId, r: u8, g: u8, b: u8) -> SessionResult<Status> {
            if self.find(id).is_some() {
                return Ok(self.get_status(id));
            }

            let rgb = [r, g, b];
            let dimmed = dim(rgb, self.config.led_dim_factor);

            if let Some(sig) = self.color_store.load(&store_key(id))? {
                if self.try_fast_reacquire(id, rgb, dimmed, sig)? {
                    info!(?id, "re-acquired controller via persisted color signature");
                    return Ok(Status::Calibrated);
                }
                debug!(?id, "fast re-acquisition failed, falling back to blink calibration");
            }

            self.led.set_color(id, dimmed).map_err(SessionError::from)?;
            let record = self.run_blink_calibration(id, rgb)?;
            self.palette.mark(rgb, true);
            let sig = PersistedSignature { assigned_rgb: rgb, e_first_bgr: record.e_first_bgr() };
            self.color_store.save(&store_key(id), sig)?;
            self.controllers.push(record);
            info!(?id, ?rgb, "controller calibrated");
            Ok(Status::Calibrated)
        }

        /// Three 100ms-spaced tracking-engine tries against a persisted color
        /// signature. Checks only `q1 > 0.83` and `q3 > 8` on every try —
        /// never `q2` — since the fast path is meant to confirm the sphere is
        /// still where it was left, not to re-validate radius stability.
        fn try_fast_reacquire(
            &mut self,
            id: ControllerId,
            rgb: [u8; 3],
            dimmed: [u8; 3],
            sig: PersistedSignature,
        ) -> SessionResult<bool> {
            let Some(pyramid) = self.pyramid else {
                return Ok(false);
            };
            let mut record = ControllerRecord::new(id, rgb, sig.e_first_bgr);
            let (w, h) = pyramid.size_for_level(0);
            record.roi_x = (self.frame_w - w) / 2;
            record.roi_y = (self.frame_h - h) / 2;
            record.roi_level = 0;

            self.led.set_color(id, dimmed).map_err(SessionError::from)?;

            for attempt in 0..3 {
                if attempt > 0 {
                    thread::sleep(Duration::from_millis(100));
                }
                let Some(frame) = self.camera.grab().map_err(SessionError::from)? else {
                    return Ok(false);
                };
                let roi = Rect::new(record.roi_x, record.roi_y, w, h).clamped(self.frame_w, self.frame_h);
                let color_hsv = sphere_core::color::bgr_to_hsv(record.e_bgr());
                let outcome = self
                    .detector
                    .detect_in_roi(&frame, roi, color_hsv, sphere_core::HSV_BAND)
                    .map_err(SessionError::from)?;
                engine::step(&mut record, roi, &pyramid, &self.config, self.frame_w, self.frame_h, outcome.as_ref());
                if record.q1 <= 0.83 || record.q3 <= 8.0 {
                    return Ok(false);
                }
            }

            self.controllers.push(record);
            Ok(true)
        }

        /// Capture 4 on/off blink cycles, intersect their difference masks
        /// to isolate the sphere, average its color over that intersection,
        /// then cross-check the estimate by re-detecting the sphere in
        /// every captured frame via the estimated HSV band.
        fn run_blink_calibration(&mut self, id: ControllerId, rgb: [u8; 3]) -> SessionResult<ControllerRecord> {
            let dimmed = dim(rgb, self.config.led_dim_factor);
            let mut on_frames: Vec<opencv::core::Mat> = Vec::with_capacity(self.config.calib_blinks as usize);
            let mut masks: Vec<BinaryMask> = Vec::with_capacity(self.config.calib_blinks as usize);

            for _ in 0..self.config.calib_blinks {
                self.led.set_color(id, dimmed).map_err(SessionError::from)?;
                let on_frame = self.poll_frame_for(Duration::from_millis(self.config.calib_blink_delay_ms))?;
                self.led.off(id).map_err(SessionError::from)?;
                let off_frame = self.poll_frame_for(Duration::from_millis(self.config.calib_blink_delay_ms))?;

                let (Some(on), Some(off)) = (on_frame, off_frame) else {
                    warn!(?id, "calibration rejected: missing a blink frame pair");
                    return Err(sphere_core::CoreError::calibration_failed("missing blink frame pair").into());
                };
                let mask = sphere_vision::diff_mask(&on, &off, self.config.calib_diff_threshold, self.config.calib_kernel_size)
                    .map_err(SessionError::from)?;
                on_frames.push(on);
                masks.push(mask);
            }

            let Some(intersection) = BinaryMask::intersect(&masks) else {
                warn!(?id, "calibration rejected: blink masks had mismatched dimensions");
                return Err(sphere_core::CoreError::calibration_failed("blink masks had mismatched dimensions").into());
            };
            let sphere_mask = sphere_vision::largest_contour_mask(&intersection).map_err(SessionError::from)?;
            if (sphere_mask.count_nonzero() as f64) < self.config.calib_min_blob_size {
                warn!(?id, count = sphere_mask.count_nonzero(), "blink mask intersection smaller than expected");
            }

            let avg_bgr = sphere_vision::mean_bgr_in_mask(&on_frames[0], &sphere_mask).map_err(SessionError::from)?;
            let avg_hsv = sphere_core::color::bgr_to_hsv(avg_bgr);
            let assigned_hsv = sphere_core::color::bgr_to_hsv([rgb[2] as f64, rgb[1] as f64, rgb[0] as f64]);
            if hue_mismatch(avg_hsv[0], assigned_hsv[0], 12.0) {
                warn!(?id, "calibrated color hue differs substantially from the assigned LED color");
            }

            let samples: Vec<Option<CrossCheckSample>> = on_frames
                .iter()
                .map(|frame| sphere_vision::detect_via_hsv_band(frame, avg_hsv, sphere_core::HSV_BAND, self.config.calib_kernel_size))
                .collect::<sphere_vision::VisionResult<Vec<_>>>()
                .map_err(SessionError::from)?;

            if !cross_check(
                &samples,
                self.config.calib_min_blob_size,
                self.config.calib_max_displacement_px,
                self.config.calib_max_blob_std_pct,
            ) {
                warn!(?id, "calibration rejected: blink cross-check failed");
                return Err(sphere_core::CoreError::calibration_failed("blink cross-check failed").into());
            }

            Ok(ControllerRecord::new(id, rgb, avg_bgr))
        }

        /// Poll frames for at least `wait`, at roughly 10ms granularity,
        /// keeping the most recent one.
        fn poll_frame_for(&mut self, wait: Duration) -> SessionResult<Option<opencv::core::Mat>> {
            let start = std::time::Instant::now();
            let mut last = None;
            loop {
                if let Some(frame) = self.camera.grab().map_err(SessionError::from)? {
                    last = Some(frame);
                }
                if start.elapsed() >= wait {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
            Ok(last)
        }
    }
}

#[cfg(not(feature = "opencv"))]
impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
where
    Cam: CameraDriver<Frame = ()>,
    Led: LedDriver,
    Store: ColorStore,
    Settings: CameraSettingsStore,
{
    /// Without the `opencv` feature there is no pixel pipeline to
    /// calibrate against; use [`Tracker::simulate_calibration`] in tests.
    pub fn enable_with_color(&mut self, id: ControllerId, r: u8, g: u8, b: u8) -> SessionResult<Status> {
        if self.find(id).is_some() {
            return Ok(self.get_status(id));
        }
        let rgb = [r, g, b];
        let dimmed = dim(rgb, self.config.led_dim_factor);
        self.led.set_color(id, dimmed)?;
        Err(sphere_core::CoreError::calibration_failed("no image backend available").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphere_core::CoreResult;
    use std::collections::HashMap;

    struct FakeCamera;
    impl CameraDriver for FakeCamera {
        type Frame = ();
        fn grab(&mut self) -> CoreResult<Option<()>> {
            Ok(None)
        }
        fn frame_width(&self) -> i32 {
            640
        }
        fn frame_height(&self) -> i32 {
            480
        }
    }

    #[derive(Default)]
    struct FakeLed;
    impl LedDriver for FakeLed {
        fn set_color(&mut self, _id: ControllerId, _rgb: [u8; 3]) -> CoreResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeColorStore {
        map: HashMap<String, PersistedSignature>,
    }
    impl ColorStore for FakeColorStore {
        fn load(&self, key: &str) -> CoreResult<Option<PersistedSignature>> {
            Ok(self.map.get(key).copied())
        }
        fn save(&mut self, key: &str, sig: PersistedSignature) -> CoreResult<()> {
            self.map.insert(key.to_string(), sig);
            Ok(())
        }
        fn remove(&mut self, key: &str) -> CoreResult<()> {
            self.map.remove(key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSettingsStore {
        exposure: Option<i32>,
    }
    impl CameraSettingsStore for FakeSettingsStore {
        fn load(&self) -> CoreResult<Option<i32>> {
            Ok(self.exposure)
        }
        fn save(&mut self, exposure: i32) -> CoreResult<()> {
            self.exposure = Some(exposure);
            Ok(())
        }
    }

    type TestTracker = Tracker<FakeCamera, FakeLed, FakeColorStore, FakeSettingsStore>;

    fn new_tracker() -> TestTracker {
        Tracker::new(FakeCamera, FakeLed, FakeColorStore::default(), FakeSettingsStore::default())
    }

    fn enable_via_simulation(t: &mut TestTracker, id: ControllerId) -> SessionResult<Status> {
        let Some(rgb) = t.palette.pick_free() else {
            return Err(sphere_core::CoreError::PaletteExhausted.into());
        };
        t.simulate_calibration(id, rgb, [200.0, 40.0, 210.0])
    }

    #[test]
    fn scenario_1_palette_allocation_cycles_through_colors_and_exhausts() {
        let mut t = new_tracker();
        enable_via_simulation(&mut t, ControllerId(1)).unwrap();
        assert_eq!(t.get_color(ControllerId(1)), Some([255, 0, 255]));

        enable_via_simulation(&mut t, ControllerId(2)).unwrap();
        assert_eq!(t.get_color(ControllerId(2)), Some([0, 255, 255]));

        enable_via_simulation(&mut t, ControllerId(3)).unwrap();
        assert_eq!(t.get_color(ControllerId(3)), Some([0, 0, 255]));

        assert!(enable_via_simulation(&mut t, ControllerId(4)).is_err());

        t.disable(ControllerId(2));
        enable_via_simulation(&mut t, ControllerId(4)).unwrap();
        assert_eq!(t.get_color(ControllerId(4)), Some([0, 255, 255]));
    }

    #[test]
    fn already_enabled_controller_is_a_no_op() {
        let mut t = new_tracker();
        enable_via_simulation(&mut t, ControllerId(1)).unwrap();
        let status = t.simulate_calibration(ControllerId(1), [1, 2, 3], [0.0, 0.0, 0.0]).unwrap();
        assert_eq!(status, Status::Calibrated);
        assert_eq!(t.get_color(ControllerId(1)), Some([255, 0, 255]));
    }

    #[test]
    fn disable_then_reenable_reuses_the_freed_color() {
        let mut t = new_tracker();
        enable_via_simulation(&mut t, ControllerId(1)).unwrap();
        t.disable(ControllerId(1));
        assert_eq!(t.get_status(ControllerId(1)), Status::NotCalibrated);
        enable_via_simulation(&mut t, ControllerId(2)).unwrap();
        assert_eq!(t.get_color(ControllerId(2)), Some([255, 0, 255]));
    }
}
