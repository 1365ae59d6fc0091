//! windowcast
//!
//! A screen and audio recording pipeline. A [`RecordingController`] drives
//! periodic video and audio grabbers that feed a bounded queue, drained by a
//! single writer thread which writes container files and rotates them at
//! keyframe boundaries.
//!
//! The capture and container layers are trait seams: plug in a
//! [`capture::CaptureService`], an optional [`capture::AudioSource`] (a
//! cpal-backed one ships in [`capture::CpalAudioSource`]), a
//! [`container::ContainerFactory`] and an [`container::EncoderFactory`], and
//! the pipeline handles scheduling, timing, rate conversion, backpressure
//! and file rotation.

pub mod capture;
pub mod container;
pub mod error;
pub mod logging;
pub mod media;
pub mod recorder;

pub use error::{RecorderError, RecorderResult};
pub use recorder::{
    AudioLevels, CaptureConfig, CaptureRect, RecorderEvent, RecordingController, RecordingState,
};
