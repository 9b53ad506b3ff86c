//! Domain model for the glowing-sphere controller tracker: color math,
//! geometry primitives, per-controller records, tuning configuration, and
//! the capability traits the tracking session is built against.
//!
//! This crate has no dependency on a vision library or on any particular
//! camera API — that lives in `sphere-vision` and `sphere-session`.

pub mod collaborators;
pub mod color;
pub mod config;
pub mod error;
pub mod geometry;
pub mod record;

pub use collaborators::{
    CameraDriver, CameraSettingsStore, ColorStore, DebugTraceSink, LedDriver, NullTraceSink,
    PersistedSignature,
};
pub use color::{ColorRegistry, PaletteColor, HSV_BAND};
pub use config::{camera_index_from_env, TrackerConfig, CAMERA_INDEX_ENV};
pub use error::{CoreError, CoreResult};
pub use geometry::{dist, dist_sq, roi_pyramid_sizes, Point, Rect, Scalar4, ROI_LEVELS, ROI_LEVEL_SHRINK};
pub use record::{ControllerId, ControllerRecord, Status};
