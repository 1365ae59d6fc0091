//! Error types and handling
//!
//! Common error types used across the recording pipeline.

use thiserror::Error;

/// Errors surfaced by the recorder.
///
/// Start-up failures come back from [`start`](crate::RecordingController::start)
/// as the typed variants below; runtime failures inside scheduled tasks or
/// the writer thread instead move the session to
/// [`RecordingState::Failed`](crate::recorder::RecordingState).
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Start screen capture failed: {0}")]
    CaptureStart(String),

    #[error("Start audio capture failed: {0}")]
    AudioLine(String),

    #[error("No encoder for format: {0}")]
    Encoder(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
