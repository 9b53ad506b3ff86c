//! Error types for the sphere tracking domain

use thiserror::Error;

/// Core error type shared by the tracking session and its collaborators
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("controller not found: {0:?}")]
    ControllerNotFound(crate::record::ControllerId),

    #[error("controller already enabled: {0:?}")]
    AlreadyEnabled(crate::record::ControllerId),

    #[error("no free illumination color in palette")]
    PaletteExhausted,

    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("invalid color: ({0}, {1}, {2})")]
    InvalidColor(u8, u8, u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn calibration_failed(msg: impl Into<String>) -> Self {
        Self::CalibrationFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
