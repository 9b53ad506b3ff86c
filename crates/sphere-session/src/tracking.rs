//! Per-frame driving: pulling a new frame from the camera and stepping
//! every tracked controller against it.

use std::collections::HashMap;

use sphere_core::{CameraDriver, CameraSettingsStore, ColorStore, ControllerId, LedDriver, Rect};
use sphere_vision::DetectionOutcome;

use crate::engine;
use crate::error::SessionResult;
use crate::tracker::Tracker;

impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
where
    Cam: CameraDriver,
    Led: LedDriver,
    Store: ColorStore,
    Settings: CameraSettingsStore,
{
    /// Grab and store the next frame from the camera. A missing frame
    /// (non-blocking driver with nothing ready yet) leaves the previously
    /// held frame in place.
    pub fn update_image(&mut self) -> SessionResult<()> {
        if let Some(frame) = self.camera.grab()? {
            self.current_frame = Some(frame);
        }
        Ok(())
    }

    fn roi_of(&self, controller_idx: usize) -> Rect {
        let r = &self.controllers[controller_idx];
        let (w, h) = self
            .pyramid
            .map(|p| p.size_for_level(r.roi_level))
            .unwrap_or((self.frame_w, self.frame_h));
        Rect::new(r.roi_x, r.roi_y, w, h).clamped(self.frame_w, self.frame_h)
    }

    /// Drive the full per-controller state machine for one frame from a
    /// caller-supplied map of detections, bypassing the camera and the
    /// `opencv` pixel pipeline entirely. A controller missing from `frame`
    /// is treated as "no contour found" (the same as a real frame where
    /// the color filter came up empty) rather than being skipped.
    ///
    /// This is the harness used to exercise `enable`/`update`/`disable`
    /// end to end in environments without the `opencv` feature, the same
    /// role a synthetic per-frame drone-position list plays against the
    /// reference pipeline's detection engine.
    pub fn update_simulated(&mut self, frame: &HashMap<ControllerId, Option<DetectionOutcome>>) -> usize {
        let started = std::time::Instant::now();
        let mut found = 0usize;

        let Some(pyramid) = self.pyramid else {
            self.controllers_found_last_update = 0;
            return 0;
        };

        for idx in 0..self.controllers.len() {
            let roi = self.roi_of(idx);
            let id = self.controllers[idx].id;
            let outcome = frame.get(&id).and_then(|o| o.as_ref());

            let record = &mut self.controllers[idx];
            let was_found = engine::step(record, roi, &pyramid, &self.config, self.frame_w, self.frame_h, outcome);
            if was_found {
                found += 1;
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.last_frame_duration_ms = duration_ms;
        if duration_ms > 0.0 {
            self.fps_ewma = 0.85 * self.fps_ewma + 0.15 * (1000.0 / duration_ms);
        }
        self.frames_processed += 1;
        self.controllers_found_last_update = found;
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphere_core::{CoreResult, PersistedSignature, Point, Status};
    use std::collections::HashMap as Map;

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
        map: Map<String, PersistedSignature>,
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

    fn circle_contour(cx: i32, cy: i32, r: i32) -> Vec<Point> {
        (0..64)
            .map(|i| {
                let theta = (i as f64 / 64.0) * std::f64::consts::TAU;
                (cx + (r as f64 * theta.cos()).round() as i32, cy + (r as f64 * theta.sin()).round() as i32)
            })
            .collect()
    }

    #[test]
    fn update_simulated_drives_enable_update_disable_end_to_end() {
        let mut t = Tracker::new(FakeCamera, FakeLed, FakeColorStore::default(), FakeSettingsStore::default());
        let id = ControllerId(1);

        t.simulate_calibration(id, [255, 0, 255], [200.0, 40.0, 210.0]).unwrap();
        assert_eq!(t.get_status(id), Status::Calibrated);

        let contour = circle_contour(160, 120, 20);
        let pixels = (std::f64::consts::PI * 20.0 * 20.0).round() as u32;
        let mut frame = HashMap::new();
        frame.insert(
            id,
            Some(DetectionOutcome {
                contour_points: contour,
                mask_pixel_count: pixels,
                mass_center: (160.0, 120.0),
                mean_bgr_in_mask: [200.0, 40.0, 210.0],
            }),
        );

        let found = t.update_simulated(&frame);
        assert_eq!(found, 1);
        assert_eq!(t.get_status(id), Status::Tracking);
        let (x, y, r) = t.get_position(id).unwrap();
        assert!((x - 160.0).abs() < 1.0);
        assert!((y - 120.0).abs() < 1.0);
        assert!(r > 4.0);
        assert!(t.get_distance_mm(id).unwrap() > 0.0);

        let lost = t.update_simulated(&Map::new());
        assert_eq!(lost, 0);
        assert_eq!(t.get_status(id), Status::Calibrated);

        t.disable(id);
        assert_eq!(t.get_status(id), Status::NotCalibrated);
        assert_eq!(t.controllers_found_last_update(), 0);
    }

    #[test]
    fn update_simulated_counts_multiple_controllers_independently() {
        let mut t = Tracker::new(FakeCamera, FakeLed, FakeColorStore::default(), FakeSettingsStore::default());
        let a = ControllerId(1);
        let b = ControllerId(2);
        t.simulate_calibration(a, [255, 0, 255], [200.0, 40.0, 210.0]).unwrap();
        t.simulate_calibration(b, [0, 255, 255], [40.0, 200.0, 40.0]).unwrap();

        let contour = circle_contour(100, 100, 20);
        let pixels = (std::f64::consts::PI * 20.0 * 20.0).round() as u32;
        let mut frame = HashMap::new();
        frame.insert(
            a,
            Some(DetectionOutcome {
                contour_points: contour,
                mask_pixel_count: pixels,
                mass_center: (100.0, 100.0),
                mean_bgr_in_mask: [200.0, 40.0, 210.0],
            }),
        );
        // b has no detection this frame.

        let found = t.update_simulated(&frame);
        assert_eq!(found, 1);
        assert_eq!(t.get_status(a), Status::Tracking);
        assert_eq!(t.get_status(b), Status::Calibrated);
    }
}

#[cfg(feature = "opencv")]
mod opencv_impl {
    use std::time::Instant;

    use tracing::trace;

    use sphere_core::{CameraDriver, CameraSettingsStore, ColorStore, ControllerId, LedDriver};

    use crate::engine;
    use crate::error::{SessionError, SessionResult};
    use crate::tracker::Tracker;

    impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
    where
        Cam: CameraDriver<Frame = opencv::core::Mat>,
        Led: LedDriver,
        Store: ColorStore,
        Settings: CameraSettingsStore,
    {
        /// Step every controller (or just `controller`, if given) against
        /// the current frame; returns the count found this frame. Updates
        /// `fps_ewma` from the measured wall-clock duration.
        pub fn update(&mut self, controller: Option<ControllerId>) -> SessionResult<usize> {
            let started = Instant::now();
            let mut found = 0usize;

            let Some(frame) = self.current_frame.clone() else {
                self.controllers_found_last_update = 0;
                return Ok(0);
            };

            let indices: Vec<usize> = match controller {
                Some(id) => self.index_of(id).into_iter().collect(),
                None => (0..self.controllers.len()).collect(),
            };

            let Some(pyramid) = self.pyramid else {
                self.controllers_found_last_update = 0;
                return Ok(0);
            };

            for idx in indices {
                let roi = self.roi_of(idx);

                if self.fps_ewma > self.config.roi_recenter_fps_threshold {
                    let color_hsv = sphere_core::color::bgr_to_hsv(self.controllers[idx].e_bgr());
                    let outcome = self
                        .detector
                        .detect_in_roi(&frame, roi, color_hsv, sphere_core::HSV_BAND)
                        .map_err(SessionError::from)?;
                    if let Some((x, y)) = engine::recenter(self.fps_ewma, &self.config, roi, outcome.as_ref()) {
                        let rect = sphere_core::Rect::new(x, y, roi.width, roi.height).clamped(self.frame_w, self.frame_h);
                        self.controllers[idx].roi_x = rect.x;
                        self.controllers[idx].roi_y = rect.y;
                    }
                }

                let roi = self.roi_of(idx);
                let color_hsv = sphere_core::color::bgr_to_hsv(self.controllers[idx].e_bgr());
                let outcome = self
                    .detector
                    .detect_in_roi(&frame, roi, color_hsv, sphere_core::HSV_BAND)
                    .map_err(SessionError::from)?;

                let record = &mut self.controllers[idx];
                let was_found = engine::step(record, roi, &pyramid, &self.config, self.frame_w, self.frame_h, outcome.as_ref());
                trace!(id = ?record.id, q1 = record.q1, q2 = record.q2, q3 = record.q3, was_found, "tracking step");
                if was_found {
                    found += 1;
                }
            }

            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.last_frame_duration_ms = duration_ms;
            if duration_ms > 0.0 {
                self.fps_ewma = 0.85 * self.fps_ewma + 0.15 * (1000.0 / duration_ms);
            }
            self.frames_processed += 1;
            self.controllers_found_last_update = found;
            Ok(found)
        }
    }
}

#[cfg(not(feature = "opencv"))]
mod no_opencv_impl {
    use std::time::Instant;

    use sphere_core::{CameraDriver, CameraSettingsStore, ColorStore, ControllerId, LedDriver};

    use crate::error::SessionResult;
    use crate::tracker::Tracker;

    impl<Cam, Led, Store, Settings> Tracker<Cam, Led, Store, Settings>
    where
        Cam: CameraDriver<Frame = ()>,
        Led: LedDriver,
        Store: ColorStore,
        Settings: CameraSettingsStore,
    {
        /// Without the `opencv` feature nothing can be detected in a real
        /// frame; use [`Tracker::update_simulated`] to drive the state
        /// machine from synthetic detections instead.
        pub fn update(&mut self, _controller: Option<ControllerId>) -> SessionResult<usize> {
            let started = Instant::now();
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.last_frame_duration_ms = duration_ms;
            self.frames_processed += 1;
            self.controllers_found_last_update = 0;
            Ok(0)
        }
    }
}
