//! Recording pipeline
//!
//! This module implements the recording pipeline:
//! - RecordingController owning session state and thread lifecycles
//! - Video and audio grabbers on periodic schedulers
//! - A bounded writer queue drained by a single writer thread
//! - Rate conversion and keyframe-gated file rotation

pub mod audio;
pub mod controller;
pub mod queue;
pub mod rate;
pub mod scheduler;
pub mod state;
pub mod video;
pub(crate) mod writer;

pub use controller::RecordingController;
pub use queue::WriterQueue;
pub use rate::RateConverter;
pub use state::{AudioLevels, CaptureConfig, CaptureRect, RecorderEvent, RecordingState};

use std::sync::atomic::{AtomicI64, Ordering};

/// The published stop boundary, in epoch milliseconds. One writer (the
/// controller's stop path), read by both grabbers each cycle so in-flight
/// cycles know their own cutoff.
pub struct StopSignal(AtomicI64);

impl StopSignal {
    /// No stop requested yet.
    pub fn new() -> Self {
        StopSignal(AtomicI64::new(i64::MAX))
    }

    pub fn set(&self, epoch_millis: i64) {
        self.0.store(epoch_millis, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
