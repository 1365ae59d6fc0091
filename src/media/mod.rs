//! Media data model
//!
//! Rational time values and the sample/format types shared by the whole
//! pipeline.

pub mod rational;
pub mod sample;

pub use rational::Rational;
pub use sample::{
    AudioFormat, ColorDepth, PcmEncoding, Point, RawImage, Sample, SampleFlags, SamplePayload,
    TrackFormat, TrackId, VideoFormat, AUDIO_TRACK, VIDEO_TRACK,
};
