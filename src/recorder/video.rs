//! Video grabbing
//!
//! A periodic task that pulls one frame per tick from the capture service,
//! composes it into a reusable working image, timestamps it against the
//! previous accepted capture, and pushes it through the rate-converter and
//! encoder into the writer queue.

use crate::capture::{CaptureFrame, CaptureService, CaptureTarget};
use crate::container::FrameEncoder;
use crate::error::RecorderResult;
use crate::media::{
    ColorDepth, RawImage, Rational, Sample, SampleFlags, SamplePayload, VIDEO_TRACK,
};
use crate::recorder::queue::WriterQueue;
use crate::recorder::rate::RateConverter;
use crate::recorder::scheduler::Tick;
use crate::recorder::StopSignal;
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct VideoGrabber {
    capture: Arc<ParkingMutex<Box<dyn CaptureService>>>,
    target: CaptureTarget,
    converter: RateConverter,
    encoder: Box<dyn FrameEncoder>,
    queue: Arc<WriterQueue>,
    /// Reusable composition buffer; `Arc::make_mut` keeps allocation bounded
    /// because the encoder drops its reference within the same tick.
    working: Arc<RawImage>,
    /// The capture taken on the previous tick, written out on this one.
    previous: Option<CaptureFrame>,
    /// Epoch-based time of the previous accepted capture, in seconds.
    prev_capture_time: Rational,
    start_time: Rational,
    stop: Arc<StopSignal>,
    sequence_number: u64,
}

impl VideoGrabber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capture: Arc<ParkingMutex<Box<dyn CaptureService>>>,
        target: CaptureTarget,
        width: u32,
        height: u32,
        depth: ColorDepth,
        converter: RateConverter,
        encoder: Box<dyn FrameEncoder>,
        queue: Arc<WriterQueue>,
        start_time_ms: i64,
        stop: Arc<StopSignal>,
    ) -> Self {
        VideoGrabber {
            capture,
            target,
            converter,
            encoder,
            queue,
            working: Arc::new(RawImage::blank(width, height, depth)),
            previous: None,
            prev_capture_time: Rational::new(start_time_ms, 1000),
            start_time: Rational::new(start_time_ms, 1000),
            stop,
            sequence_number: 0,
        }
    }

    /// One grab cycle. Capture failures skip the tick; crossing the stop
    /// boundary cancels further scheduling.
    pub fn tick(&mut self) -> RecorderResult<Tick> {
        let time_before = now_millis();
        let frame = self.capture.lock().capture(&self.target);
        let Some(frame) = frame else {
            // Screen capture is best-effort per cycle.
            tracing::debug!("Video capture returned nothing, skipping tick");
            return Ok(Tick::Continue);
        };
        let time_after = now_millis();

        // The very first tick has no previous frame; reuse the current one
        // so the first emitted sample gets a well-defined duration.
        let previous = self.previous.take().unwrap_or_else(|| frame.clone());
        Arc::make_mut(&mut self.working).compose_from(&previous.image);

        let stop_millis = self.stop.get();
        let mut cancel = false;
        if self.prev_capture_time < Rational::new(stop_millis, 1000) {
            let capture_time = Rational::new(time_after, 1000);
            let sample = Sample {
                track: VIDEO_TRACK,
                timestamp: self.prev_capture_time - self.start_time,
                duration: capture_time - self.prev_capture_time,
                sample_count: 1,
                sequence_number: self.sequence_number,
                flags: SampleFlags::KEYFRAME,
                payload: SamplePayload::Image(self.working.clone()),
                overlay: previous.cursor,
            };
            self.sequence_number += 1;
            self.prev_capture_time = capture_time;
            if !self.submit(sample)? {
                cancel = true;
            }
        }

        self.previous = Some(frame);
        if time_before > stop_millis {
            cancel = true;
        }
        Ok(if cancel { Tick::Cancel } else { Tick::Continue })
    }

    /// Rate-converts, encodes and enqueues one sample. Returns `false` when
    /// the queue has been closed underneath us.
    fn submit(&mut self, sample: Sample) -> RecorderResult<bool> {
        for converted in self.converter.convert(sample) {
            let encoded = self.encoder.process(&converted)?;
            if self.queue.push(encoded).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
