//! The typed unit of media data flowing through the pipeline
//!
//! A [`Sample`] carries one grabbed frame or one block of audio together with
//! its track, rational timing, flags and payload. Samples are created fresh
//! each grab cycle and move to the writer thread's ownership once enqueued.

use crate::media::rational::Rational;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifies a stream within one container file.
pub type TrackId = u32;

/// Track id used for video samples.
pub const VIDEO_TRACK: TrackId = 0;

/// Track id used for audio samples.
pub const AUDIO_TRACK: TrackId = 1;

/// Bit-set of per-sample flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFlags(u8);

impl SampleFlags {
    /// Self-contained sample, decodable without prior frames. Every raw
    /// screen capture is one, which is what makes file rotation safe.
    pub const KEYFRAME: SampleFlags = SampleFlags(0b01);
    /// Rate-converted filler frame whose pixel data is unchanged from the
    /// previous sample; encoders may reuse their previous output.
    pub const DUPLICATE: SampleFlags = SampleFlags(0b10);

    pub const fn empty() -> Self {
        SampleFlags(0)
    }

    pub fn contains(&self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SampleFlags) {
        self.0 |= other.0;
    }

    pub fn with(mut self, other: SampleFlags) -> Self {
        self.insert(other);
        self
    }
}

/// A screen position, used for cursor/annotation overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Color depth of captured video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorDepth {
    /// 8-bit palettized (classic Mac color table).
    Indexed8,
    /// 16-bit RGB 555.
    Rgb16,
    /// 24-bit RGB, stored in 3 bytes per pixel.
    Rgb24,
}

impl ColorDepth {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ColorDepth::Indexed8 => 1,
            ColorDepth::Rgb16 => 2,
            ColorDepth::Rgb24 => 3,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bytes_per_pixel() as u32 * 8
    }
}

/// A raw, un-encoded bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub depth: ColorDepth,
    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub data: Vec<u8>,
}

impl RawImage {
    /// An all-zero image of the given dimensions.
    pub fn blank(width: u32, height: u32, depth: ColorDepth) -> Self {
        RawImage {
            width,
            height,
            depth,
            data: vec![0; width as usize * height as usize * depth.bytes_per_pixel()],
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.depth.bytes_per_pixel()
    }

    /// Copies `src` into the top-left corner, cropping to whatever overlaps.
    /// Used by the video grabber to compose captures into its reusable
    /// working buffer without reallocating.
    pub fn compose_from(&mut self, src: &RawImage) {
        let bpp = self.depth.bytes_per_pixel();
        let rows = self.height.min(src.height) as usize;
        let cols_bytes = (self.width.min(src.width) as usize) * bpp;
        let dst_stride = self.row_bytes();
        let src_stride = src.row_bytes();
        for row in 0..rows {
            let d = row * dst_stride;
            let s = row * src_stride;
            self.data[d..d + cols_bytes].copy_from_slice(&src.data[s..s + cols_bytes]);
        }
    }
}

/// Payload of a sample: a raw image before encoding, or bytes (audio, or
/// video after encoding).
#[derive(Debug, Clone)]
pub enum SamplePayload {
    Image(Arc<RawImage>),
    Bytes(Vec<u8>),
}

impl SamplePayload {
    pub fn byte_len(&self) -> usize {
        match self {
            SamplePayload::Image(img) => img.data.len(),
            SamplePayload::Bytes(b) => b.len(),
        }
    }
}

/// One unit of media data.
#[derive(Debug, Clone)]
pub struct Sample {
    pub track: TrackId,
    /// Start of the interval this sample covers, relative to session start.
    pub timestamp: Rational,
    /// Duration of one sample. For audio this is the per-PCM-frame duration;
    /// the covered interval is `duration * sample_count`.
    pub duration: Rational,
    /// Number of PCM frames in an audio payload; 1 for video.
    pub sample_count: u64,
    /// Strictly increasing per track.
    pub sequence_number: u64,
    pub flags: SampleFlags,
    pub payload: SamplePayload,
    /// Cursor/annotation position, video only, absent when not applicable.
    pub overlay: Option<Point>,
}

impl Sample {
    pub fn is_video(&self) -> bool {
        self.track == VIDEO_TRACK
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(SampleFlags::KEYFRAME)
    }

    /// End of the covered interval: `timestamp + duration * sample_count`.
    pub fn end_timestamp(&self) -> Rational {
        self.timestamp + self.duration.mul_int(self.sample_count as i64)
    }
}

/// Format descriptor for one track, handed to the container writer when a
/// file is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub depth: ColorDepth,
    pub frame_rate: Rational,
}

/// PCM encoding of an audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmEncoding {
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: PcmEncoding,
    pub big_endian: bool,
}

impl AudioFormat {
    /// Bytes per PCM frame (one sample across all channels).
    pub fn frame_size(&self) -> usize {
        self.bits_per_sample as usize / 8 * self.channels as usize
    }

    /// Duration of a single PCM frame.
    pub fn sample_duration(&self) -> Rational {
        Rational::new(1, self.sample_rate as i64)
    }
}
