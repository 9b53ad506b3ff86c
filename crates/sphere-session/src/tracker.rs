//! The public tracking session: controller lifecycle, status, and the
//! per-frame position/distance readouts. Calibration and the per-frame
//! search loop live in [`crate::calibration`] and [`crate::tracking`] as
//! separate `impl` blocks on this same type.

use tracing::{info, warn};

use sphere_core::{
    CameraDriver, CameraSettingsStore, ColorRegistry, ColorStore, ControllerId, ControllerRecord,
    DebugTraceSink, LedDriver, NullTraceSink, Status, TrackerConfig,
};
use sphere_vision::SphereDetector;

use crate::engine::RoiPyramid;
use crate::error::SessionResult;

/// A single mutable tracking session, generic over its camera, LED,
/// color-store and settings-store collaborators so it can be driven by
/// either real hardware/file-backed implementations or test fakes.
pub struct Tracker<Cam, Led, Store, Settings>
where
    Cam: CameraDriver,
    Led: LedDriver,
    Store: ColorStore,
    Settings: CameraSettingsStore,
{
    pub(crate) camera: Cam,
    pub(crate) led: Led,
    pub(crate) color_store: Store,
    pub(crate) settings_store: Settings,
    pub(crate) trace: Box<dyn DebugTraceSink<Frame = Cam::Frame>>,
    pub(crate) config: TrackerConfig,
    pub(crate) palette: ColorRegistry,
    pub(crate) controllers: Vec<ControllerRecord>,
    pub(crate) detector: SphereDetector,
    pub(crate) pyramid: Option<RoiPyramid>,
    pub(crate) frame_w: i32,
    pub(crate) frame_h: i32,
    pub(crate) current_frame: Option<Cam::Frame>,
    pub(crate) fps_ewma: f64,
    pub(crate) last_frame_duration_ms: f64,
    pub(crate) frames_processed: u64,
    pub(crate) controllers_found_last_update: usize,
    pub(crate) exposure: i32,
}

/// Format a controller id as the persistence key.
pub(crate) fn store_key(id: ControllerId) -> String {
    id.0.to_string()
}

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
    pub fn new(camera: Cam, led: Led, color_store: Store, settings_store: Settings) -> Self {
        Self::with_config(camera, led, color_store, settings_store, TrackerConfig::default())
    }

    pub fn with_config(
        camera: Cam,
        led: Led,
        color_store: Store,
        settings_store: Settings,
        config: TrackerConfig,
    ) -> Self {
        let frame_w = camera.frame_width();
        let frame_h = camera.frame_height();
        let exposure = camera.exposure().unwrap_or(config.good_exposure);
        let pyramid = if frame_w > 0 && frame_h > 0 { Some(RoiPyramid::new(frame_w, frame_h)) } else { None };

        info!(frame_w, frame_h, exposure, "tracker session started");

        Self {
            camera,
            led,
            color_store,
            settings_store,
            trace: Box::new(NullTraceSink::default()),
            config,
            palette: ColorRegistry::new(),
            controllers: Vec::new(),
            detector: SphereDetector::new(),
            pyramid,
            frame_w,
            frame_h,
            current_frame: None,
            fps_ewma: 0.0,
            last_frame_duration_ms: 0.0,
            frames_processed: 0,
            controllers_found_last_update: 0,
            exposure,
        }
    }

    /// Replace the debug trace sink (a no-op sink is installed by default).
    pub fn with_trace(mut self, trace: Box<dyn DebugTraceSink<Frame = Cam::Frame>>) -> Self {
        self.trace = trace;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub(crate) fn find(&self, id: ControllerId) -> Option<&ControllerRecord> {
        self.controllers.iter().find(|c| c.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: ControllerId) -> Option<&mut ControllerRecord> {
        self.controllers.iter_mut().find(|c| c.id == id)
    }

    pub(crate) fn index_of(&self, id: ControllerId) -> Option<usize> {
        self.controllers.iter().position(|c| c.id == id)
    }

    pub fn get_status(&self, id: ControllerId) -> Status {
        self.find(id).map(|r| r.status()).unwrap_or(Status::NotCalibrated)
    }

    /// The controller's current LED color, after applying `led_dim_factor`
    /// (the value actually committed to the driver). `None` if the
    /// controller is not enabled.
    pub fn get_color(&self, id: ControllerId) -> Option<[u8; 3]> {
        self.find(id).map(|r| dim(r.assigned_rgb, self.config.led_dim_factor))
    }

    pub fn get_position(&self, id: ControllerId) -> Option<(f64, f64, f64)> {
        self.find(id).map(|r| (r.x, r.y, r.r))
    }

    /// Estimated physical distance to the controller, in millimeters,
    /// derived from the current smoothed radius.
    pub fn get_distance_mm(&self, id: ControllerId) -> Option<f64> {
        self.find(id).map(|r| {
            sphere_vision::estimate_distance_mm(
                r.r * 2.0,
                self.config.focal_deg,
                self.config.sphere_diameter_mm,
                self.config.sensor_pixel_height_um,
                self.config.user_distance_factor,
            )
        })
    }

    pub fn get_image(&self) -> Option<&Cam::Frame> {
        self.current_frame.as_ref()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn controllers_found_last_update(&self) -> usize {
        self.controllers_found_last_update
    }

    pub fn fps_ewma(&self) -> f64 {
        self.fps_ewma
    }

    /// Disable a controller: frees its palette color, turns off its LED,
    /// and drops its record. A no-op on an unknown id.
    pub fn disable(&mut self, id: ControllerId) {
        let Some(idx) = self.index_of(id) else {
            return;
        };
        let record = self.controllers.remove(idx);
        self.palette.mark(record.assigned_rgb, false);
        if let Err(err) = self.led.off(id) {
            warn!(?id, %err, "failed to turn off LED on disable");
        }
        info!(?id, "controller disabled");
    }

    /// Persist every controller's current color signature, attempt to
    /// restore the pre-session camera settings, and consume the session.
    /// The settings restore is best-effort: failure is logged, never
    /// propagated, since there is no collaborator in scope to report it to.
    pub fn free(mut self) -> SessionResult<()> {
        for record in &self.controllers {
            let sig = sphere_core::PersistedSignature {
                assigned_rgb: record.assigned_rgb,
                e_first_bgr: record.e_first_bgr(),
            };
            if let Err(err) = self.color_store.save(&store_key(record.id), sig) {
                warn!(id = ?record.id, %err, "failed to persist color signature on teardown");
            }
        }

        match self.settings_store.load() {
            Ok(Some(exposure)) => {
                if let Err(err) = self.camera.set_exposure(exposure) {
                    warn!(%err, "failed to restore camera exposure on teardown");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to load camera-settings backup on teardown"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphere_core::CoreResult;
    use std::collections::HashMap;

    struct FakeCamera {
        exposure: Option<i32>,
    }
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
        fn exposure(&self) -> Option<i32> {
            self.exposure
        }
        fn set_exposure(&mut self, value: i32) -> CoreResult<()> {
            self.exposure = Some(value);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLed {
        off_calls: Vec<ControllerId>,
    }
    impl LedDriver for FakeLed {
        fn set_color(&mut self, _id: ControllerId, _rgb: [u8; 3]) -> CoreResult<()> {
            Ok(())
        }
        fn off(&mut self, id: ControllerId) -> CoreResult<()> {
            self.off_calls.push(id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeColorStore {
        map: HashMap<String, sphere_core::PersistedSignature>,
    }
    impl ColorStore for FakeColorStore {
        fn load(&self, key: &str) -> CoreResult<Option<sphere_core::PersistedSignature>> {
            Ok(self.map.get(key).copied())
        }
        fn save(&mut self, key: &str, sig: sphere_core::PersistedSignature) -> CoreResult<()> {
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

    fn new_tracker() -> Tracker<FakeCamera, FakeLed, FakeColorStore, FakeSettingsStore> {
        Tracker::new(
            FakeCamera { exposure: None },
            FakeLed::default(),
            FakeColorStore::default(),
            FakeSettingsStore::default(),
        )
    }

    #[test]
    fn unknown_controller_reports_not_calibrated_and_no_position() {
        let t = new_tracker();
        assert_eq!(t.get_status(ControllerId(99)), Status::NotCalibrated);
        assert!(t.get_color(ControllerId(99)).is_none());
        assert!(t.get_position(ControllerId(99)).is_none());
        assert!(t.get_distance_mm(ControllerId(99)).is_none());
    }

    #[test]
    fn calibrated_controller_reports_position_and_distance() {
        let mut t = new_tracker();
        t.simulate_calibration(ControllerId(1), [255, 0, 255], [200.0, 40.0, 210.0]).unwrap();
        if let Some(record) = t.find_mut(ControllerId(1)) {
            record.x = 100.0;
            record.y = 120.0;
            record.r = 23.5;
        }
        assert_eq!(t.get_status(ControllerId(1)), Status::Calibrated);
        assert_eq!(t.get_position(ControllerId(1)), Some((100.0, 120.0, 23.5)));
        let dist = t.get_distance_mm(ControllerId(1)).unwrap();
        assert!(dist > 0.0 && dist.is_finite());
    }

    #[test]
    fn led_dim_factor_divides_reported_color() {
        let mut config = TrackerConfig::default();
        config.led_dim_factor = 2;
        let mut t = Tracker::with_config(
            FakeCamera { exposure: None },
            FakeLed::default(),
            FakeColorStore::default(),
            FakeSettingsStore::default(),
            config,
        );
        t.simulate_calibration(ControllerId(1), [200, 100, 50], [0.0, 0.0, 0.0]).unwrap();
        assert_eq!(t.get_color(ControllerId(1)), Some([100, 50, 25]));
    }

    #[test]
    fn disable_turns_off_led_and_frees_palette_color() {
        let mut t = new_tracker();
        t.simulate_calibration(ControllerId(1), [255, 0, 255], [200.0, 40.0, 210.0]).unwrap();
        t.disable(ControllerId(1));
        assert_eq!(t.get_status(ControllerId(1)), Status::NotCalibrated);
        assert_eq!(t.led.off_calls, vec![ControllerId(1)]);
        assert_eq!(t.palette.pick_free(), Some([255, 0, 255]));
    }

    #[test]
    fn disabling_unknown_controller_is_a_no_op() {
        let mut t = new_tracker();
        t.disable(ControllerId(42));
        assert_eq!(t.controllers.len(), 0);
    }

    #[test]
    fn free_persists_signatures_and_restores_exposure() {
        let mut settings = FakeSettingsStore::default();
        settings.save(1234).unwrap();
        let mut t = Tracker::new(FakeCamera { exposure: Some(2051) }, FakeLed::default(), FakeColorStore::default(), settings);
        t.simulate_calibration(ControllerId(1), [255, 0, 255], [200.0, 40.0, 210.0]).unwrap();
        t.free().unwrap();
    }
}
