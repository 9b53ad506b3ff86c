//! Top-level error type for the tracking session facade

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] sphere_core::CoreError),

    #[error(transparent)]
    Vision(#[from] sphere_vision::VisionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
