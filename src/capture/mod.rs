//! Capture collaborators
//!
//! Traits for the external pixel-acquisition and audio-line collaborators,
//! plus a cpal-backed audio source for the common case.

pub mod cpal_source;
pub mod traits;

pub use cpal_source::CpalAudioSource;
pub use traits::{AudioSource, CaptureFrame, CaptureService, CaptureTarget};
