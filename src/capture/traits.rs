//! Capture trait definitions
//!
//! Platform-agnostic seams for the two capture collaborators: the window
//! pixel source and the audio input line. The pipeline only consumes these;
//! opening devices and enumerating windows is the implementation's business.

use crate::error::RecorderResult;
use crate::media::{AudioFormat, Point, RawImage};
use serde::{Deserialize, Serialize};

/// What the capture service should grab each cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureTarget {
    /// All visible windows belonging to a process.
    Process(u32),
    /// An explicit set of native window handles.
    Windows(Vec<u64>),
}

/// One grabbed frame, with the cursor position when the implementation
/// tracks it.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub image: RawImage,
    pub cursor: Option<Point>,
}

/// Grabs the pixels of a target's visible windows.
///
/// Capture is best-effort per cycle: implementations return `None` (or a
/// placeholder image) on transient failure and never propagate errors into
/// the pipeline. A `None` makes the video grabber skip that tick.
pub trait CaptureService: Send {
    fn capture(&mut self, target: &CaptureTarget) -> Option<CaptureFrame>;

    /// Called once when the session's video grabber shuts down.
    fn close(&mut self) {}
}

/// An opened audio input line.
///
/// `open`/`start`/`close` are scoped to one recording session; `read` is
/// called every scheduler tick and returns however many bytes are available,
/// up to the buffer length.
pub trait AudioSource: Send {
    fn format(&self) -> AudioFormat;

    fn open(&mut self) -> RecorderResult<()>;

    fn start(&mut self) -> RecorderResult<()>;

    /// Reads up to `buf.len()` bytes of PCM data, returning the byte count.
    fn read(&mut self, buf: &mut [u8]) -> RecorderResult<usize>;

    fn close(&mut self);
}
