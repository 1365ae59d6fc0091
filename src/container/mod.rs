//! Container and encoder collaborators
//!
//! The pipeline never touches a media container format directly. It talks to
//! a [`ContainerWriter`] behind a factory, queries capabilities instead of
//! inspecting concrete types, and hands raw video samples to a
//! [`FrameEncoder`]. Output file naming lives here too.

use crate::error::{RecorderError, RecorderResult};
use crate::media::{Sample, TrackFormat, TrackId, VideoFormat};
use std::path::{Path, PathBuf};

/// A multi-track media file being written.
///
/// Writers must tolerate `close` running on a helper thread while a sibling
/// instance is already accepting writes; rotation overlaps the old file's
/// finalization with new captures.
pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &TrackFormat) -> RecorderResult<TrackId>;

    fn write(&mut self, track: TrackId, sample: &Sample) -> RecorderResult<()>;

    /// Whether the format mandates constant video sample duration. When true
    /// the pipeline converts the variable-cadence capture stream to a fixed
    /// frame rate.
    fn requires_fixed_frame_rate(&self) -> bool;

    /// Whether 8-bit tracks take an indexed color table.
    fn supports_palette(&self) -> bool;

    fn set_palette(&mut self, track: TrackId, palette: &[[u8; 3]]) -> RecorderResult<()>;

    /// Whether the configured data-size limit for this file has been reached.
    fn is_data_limit_reached(&self) -> bool;

    /// Flushes and finalizes the file.
    fn close(self: Box<Self>) -> RecorderResult<()>;
}

/// A freshly opened output file and its writer.
pub struct OpenedContainer {
    pub path: PathBuf,
    pub writer: Box<dyn ContainerWriter>,
}

/// Opens a new output file each time the pipeline starts or rotates.
pub trait ContainerFactory: Send + Sync {
    fn open(&self, max_file_size: u64) -> RecorderResult<OpenedContainer>;
}

/// Transforms one raw video sample into an encoded one. A
/// [`DUPLICATE`](crate::media::SampleFlags::DUPLICATE) input signals that the
/// pixel data is unchanged and the previous encoded frame may be reused.
pub trait FrameEncoder: Send {
    fn process(&mut self, sample: &Sample) -> RecorderResult<Sample>;
}

/// Produces a frame encoder for a session's video format, or fails when the
/// format cannot be encoded.
pub trait EncoderFactory: Send + Sync {
    fn encoder_for(&self, format: &VideoFormat) -> RecorderResult<Box<dyn FrameEncoder>>;
}

/// The folder recordings land in, with timestamp-based file naming.
#[derive(Debug, Clone)]
pub struct MovieFolder {
    root: PathBuf,
}

impl MovieFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MovieFolder { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns a fresh `<prefix>_<timestamp>.<extension>` path inside the
    /// folder, creating the folder on demand.
    pub fn next_file(&self, prefix: &str, extension: &str) -> RecorderResult<PathBuf> {
        if self.root.exists() {
            if !self.root.is_dir() {
                return Err(RecorderError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("\"{}\" is not a directory", self.root.display()),
                )));
            }
        } else {
            std::fs::create_dir_all(&self.root)?;
        }
        let stamp = chrono::Local::now().format("%Y_%m_%d_at_%H.%M.%S");
        Ok(self.root.join(format!("{prefix}_{stamp}.{extension}")))
    }
}

/// The classic Macintosh 256-color table used for 8-bit video tracks:
/// a 6x6x6 color cube followed by red, green, blue and gray ramps, with
/// black last.
pub fn mac_palette() -> [[u8; 3]; 256] {
    let mut palette = [[0u8; 3]; 256];
    let mut index = 0;
    for r in 0..6u16 {
        for g in 0..6u16 {
            for b in 0..6u16 {
                palette[index] = [
                    (255 - 51 * r) as u8,
                    (255 - 51 * g) as u8,
                    (255 - 51 * b) as u8,
                ];
                index += 1;
            }
        }
    }
    // The cube ends in black at 215; the ramps overwrite from there and
    // black moves to the final slot.
    index -= 1;
    let ramp = [238u8, 221, 204, 187, 170, 153, 136, 119, 102, 85, 68, 51, 34, 17];
    let ramp: Vec<u8> = ramp
        .into_iter()
        .filter(|v| v % 51 != 0) // multiples of 51 already exist in the cube
        .collect();
    for &v in &ramp {
        palette[index] = [v, 0, 0];
        index += 1;
    }
    for &v in &ramp {
        palette[index] = [0, v, 0];
        index += 1;
    }
    for &v in &ramp {
        palette[index] = [0, 0, v];
        index += 1;
    }
    for &v in &ramp {
        palette[index] = [v, v, v];
        index += 1;
    }
    palette[index] = [0, 0, 0];
    debug_assert_eq!(index, 255);
    palette
}
