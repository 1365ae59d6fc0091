//! Recording state management
//!
//! Defines the recording state machine, per-session configuration and the
//! values exposed to external observers.

use crate::capture::CaptureTarget;
use crate::media::{AudioFormat, ColorDepth, Rational, VideoFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Current state of the recording pipeline.
///
/// Transitions are performed only by the controller and are always published
/// on its event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "message")]
pub enum RecordingState {
    /// No recording in progress (also the terminal state of a clean stop).
    Idle,
    /// Currently recording
    Recording,
    /// The session was torn down after an unrecoverable error.
    Failed(String),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording)
    }

    /// The failure message, when failed.
    pub fn message(&self) -> Option<&str> {
        match self {
            RecordingState::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// Recording started
    Started,
    /// Recording stopped cleanly
    Stopped,
    /// The session failed and was torn down
    Failed(String),
    /// A new output file was opened (first file or rotation)
    FileOpened(PathBuf),
}

/// The pixel bounds being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Configuration for a recording session.
///
/// Set once at construction and never mutated mid-recording; the file
/// rotation thresholds may be adjusted between sessions and take effect at
/// the next `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Pixel bounds of the working video image.
    pub capture_area: CaptureRect,

    /// Requested video frame rate, in frames per second.
    pub frame_rate: Rational,

    /// Color depth of captured frames.
    pub depth: ColorDepth,

    /// Audio settings; `None` records video only.
    pub audio: Option<AudioFormat>,

    /// Maximum wall-clock age of one output file before rotation.
    pub max_file_duration: Duration,

    /// Maximum data size of one output file before rotation.
    pub max_file_size: u64,

    /// Whose windows to capture.
    pub target: CaptureTarget,
}

impl CaptureConfig {
    pub fn new(
        capture_area: CaptureRect,
        frame_rate: Rational,
        depth: ColorDepth,
        target: CaptureTarget,
    ) -> Self {
        CaptureConfig {
            capture_area,
            frame_rate,
            depth,
            audio: None,
            max_file_duration: Duration::from_secs(60 * 60),
            max_file_size: u64::MAX,
            target,
        }
    }

    pub fn video_format(&self) -> VideoFormat {
        VideoFormat {
            width: self.capture_area.width,
            height: self.capture_area.height,
            depth: self.depth,
            frame_rate: self.frame_rate,
        }
    }

    /// Video scheduler period, at least one millisecond.
    pub fn frame_interval(&self) -> Duration {
        let ms = (1000.0 / self.frame_rate.to_f64()) as u64;
        Duration::from_millis(ms.max(1))
    }

    /// Writer queue capacity: one second of frames plus one.
    pub fn queue_capacity(&self) -> usize {
        self.frame_rate.floor().max(0) as usize + 1
    }
}

/// Live audio level metering, per channel.
///
/// `None` means unspecified: no audio configured, no signal observed yet, or
/// an encoding the meter does not support.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevels {
    pub left: Option<f32>,
    pub right: Option<f32>,
}

impl AudioLevels {
    pub fn unspecified() -> Self {
        AudioLevels::default()
    }
}
