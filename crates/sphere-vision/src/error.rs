//! Error types for the vision crate

use thiserror::Error;

/// Errors that can occur in calibration, detection, and tracking
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("frame processing error: {0}")]
    FrameProcessing(String),

    #[error("calibration failed: {0}")]
    Calibration(String),

    #[error("detection error: {0}")]
    Detection(String),

    #[error("core error: {0}")]
    Core(#[from] sphere_core::CoreError),
}

impl VisionError {
    pub fn frame_processing(msg: impl Into<String>) -> Self {
        Self::FrameProcessing(msg.into())
    }

    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration(msg.into())
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection(msg.into())
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        Self::OpenCv(err.to_string())
    }
}

pub type VisionResult<T> = Result<T, VisionError>;
