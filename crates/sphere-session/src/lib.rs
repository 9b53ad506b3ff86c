//! The tracking session facade: wires the pure calibration/tracking math
//! in `sphere-vision` to injected camera/LED/persistence collaborators and
//! exposes the public `Tracker` lifecycle.

pub mod calibration;
pub mod engine;
pub mod error;
pub mod json_store;
pub mod tracker;
pub mod tracking;

pub use error::{SessionError, SessionResult};
pub use json_store::{JsonCameraSettingsStore, JsonColorStore};
pub use tracker::Tracker;
