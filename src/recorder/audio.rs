//! Audio grabbing
//!
//! A short-period task that drains the audio source, meters signal levels,
//! timestamps samples by cumulative sample count (immune to scheduler
//! jitter) and truncates the final buffer at the stop boundary.

use crate::capture::AudioSource;
use crate::error::RecorderResult;
use crate::media::{
    AudioFormat, PcmEncoding, Rational, Sample, SampleFlags, SamplePayload, AUDIO_TRACK,
};
use crate::recorder::queue::WriterQueue;
use crate::recorder::scheduler::Tick;
use crate::recorder::state::AudioLevels;
use crate::recorder::StopSignal;
use parking_lot::Mutex as ParkingMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Sentinel stored in the meter cells when no level is known.
const NOT_SPECIFIED: f32 = -1.0;

/// Lock-free per-channel level cells. One writer (the audio grabber), any
/// number of opportunistic readers; staleness is fine, this is monitoring
/// only.
pub struct LevelMeter {
    left: AtomicU32,
    right: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        LevelMeter {
            left: AtomicU32::new(NOT_SPECIFIED.to_bits()),
            right: AtomicU32::new(NOT_SPECIFIED.to_bits()),
        }
    }

    fn set(&self, left: Option<f32>, right: Option<f32>) {
        self.left
            .store(left.unwrap_or(NOT_SPECIFIED).to_bits(), Ordering::Relaxed);
        self.right
            .store(right.unwrap_or(NOT_SPECIFIED).to_bits(), Ordering::Relaxed);
    }

    pub fn levels(&self) -> AudioLevels {
        let read = |cell: &AtomicU32| {
            let value = f32::from_bits(cell.load(Ordering::Relaxed));
            (value >= 0.0).then_some(value)
        };
        AudioLevels {
            left: read(&self.left),
            right: read(&self.right),
        }
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Root-mean-square level of one channel of signed 8-bit PCM, in [0, 1].
fn rms_signed8(data: &[u8], offset: usize, stride: usize) -> f32 {
    let mut sum = 0f64;
    let mut count = 0u64;
    let mut i = offset;
    while i < data.len() {
        let value = data[i] as i8 as f64;
        // The line records silence as -128; leave it out of the average.
        if value != -128.0 {
            sum += value * value;
        }
        count += 1;
        i += stride;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64).sqrt() / 128.0) as f32
}

/// Root-mean-square level of one channel of signed 16-bit PCM, in [0, 1].
fn rms_signed16(data: &[u8], offset: usize, stride: usize, big_endian: bool) -> f32 {
    let mut sum = 0f64;
    let mut count = 0u64;
    let mut i = offset;
    while i + 1 < data.len() {
        let bytes = [data[i], data[i + 1]];
        let value = if big_endian {
            i16::from_be_bytes(bytes)
        } else {
            i16::from_le_bytes(bytes)
        } as f64;
        sum += value * value;
        count += 1;
        i += stride;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64).sqrt() / 32768.0) as f32
}

/// Per-channel RMS levels for signed 8/16-bit PCM, mono or stereo;
/// unspecified for anything else.
pub(crate) fn compute_levels(format: &AudioFormat, data: &[u8]) -> (Option<f32>, Option<f32>) {
    if format.encoding != PcmEncoding::Signed {
        return (None, None);
    }
    let stride = format.frame_size();
    match (format.bits_per_sample, format.channels) {
        (8, 1) => (Some(rms_signed8(data, 0, stride)), None),
        (8, 2) => (
            Some(rms_signed8(data, 0, stride)),
            Some(rms_signed8(data, 1, stride)),
        ),
        (16, 1) => (
            Some(rms_signed16(data, 0, stride, format.big_endian)),
            None,
        ),
        (16, 2) => (
            Some(rms_signed16(data, 0, stride, format.big_endian)),
            Some(rms_signed16(data, 2, stride, format.big_endian)),
        ),
        _ => (None, None),
    }
}

pub struct AudioGrabber {
    source: Arc<ParkingMutex<Box<dyn AudioSource>>>,
    format: AudioFormat,
    queue: Arc<WriterQueue>,
    meter: Arc<LevelMeter>,
    stop: Arc<StopSignal>,
    start_time_ms: i64,
    buffer_size: usize,
    total_sample_count: u64,
    sequence_number: u64,
}

impl AudioGrabber {
    pub fn new(
        source: Arc<ParkingMutex<Box<dyn AudioSource>>>,
        format: AudioFormat,
        queue: Arc<WriterQueue>,
        meter: Arc<LevelMeter>,
        start_time_ms: i64,
        stop: Arc<StopSignal>,
    ) -> Self {
        AudioGrabber {
            source,
            format,
            queue,
            meter,
            stop,
            start_time_ms,
            buffer_size: Self::buffer_size(&format),
            total_sample_count: 0,
            sequence_number: 0,
        }
    }

    /// Half a second of audio for even sample rates (so files can split
    /// mid-second), a full second otherwise.
    fn buffer_size(format: &AudioFormat) -> usize {
        let mut size = format.frame_size() * format.sample_rate as usize;
        if format.sample_rate % 2 == 0 {
            size /= 2;
        }
        size
    }

    /// One drain cycle. Crossing the stop boundary truncates the sample and
    /// cancels further scheduling.
    pub fn tick(&mut self) -> RecorderResult<Tick> {
        let mut data = vec![0u8; self.buffer_size];
        let count = self.source.lock().read(&mut data)?;
        if count == 0 {
            return Ok(Tick::Continue);
        }

        let (left, right) = compute_levels(&self.format, &data[..count]);
        self.meter.set(left, right);

        let frame_size = self.format.frame_size();
        let mut sample_count = (count / frame_size) as u64;
        let duration = self.format.sample_duration();
        let timestamp = Rational::new(
            self.total_sample_count as i64,
            self.format.sample_rate as i64,
        );

        // Truncate at the stop boundary. The ceiling keeps a final partial
        // sample whenever the boundary falls between two sample edges.
        let mut cancel = false;
        let stop_ts = Rational::new(self.stop.get() - self.start_time_ms, 1000);
        if timestamp + duration.mul_int(sample_count as i64) > stop_ts {
            sample_count = ((stop_ts - timestamp) / duration).ceil().max(0) as u64;
            cancel = true;
        }

        if sample_count > 0 {
            data.truncate(sample_count as usize * frame_size);
            let sample = Sample {
                track: AUDIO_TRACK,
                timestamp,
                duration,
                sample_count,
                sequence_number: self.sequence_number,
                flags: SampleFlags::KEYFRAME,
                payload: SamplePayload::Bytes(data),
                overlay: None,
            };
            self.sequence_number += 1;
            // Queue-full blocks this tick; audio relies on backpressure, not
            // on dropping.
            if self.queue.push(sample).is_err() {
                cancel = true;
            }
        }
        self.total_sample_count += sample_count;

        Ok(if cancel { Tick::Cancel } else { Tick::Continue })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::ScriptedAudioSource;

    fn format(sample_rate: u32, bits: u16, channels: u16) -> AudioFormat {
        AudioFormat {
            sample_rate,
            bits_per_sample: bits,
            channels,
            encoding: PcmEncoding::Signed,
            big_endian: false,
        }
    }

    fn grabber(
        fmt: AudioFormat,
        reads: Vec<usize>,
        fill: i16,
        queue: Arc<WriterQueue>,
        stop: Arc<StopSignal>,
    ) -> AudioGrabber {
        let source: Arc<ParkingMutex<Box<dyn AudioSource>>> = Arc::new(ParkingMutex::new(
            Box::new(ScriptedAudioSource::new(fmt, reads, fill)),
        ));
        AudioGrabber::new(source, fmt, queue, Arc::new(LevelMeter::new()), 0, stop)
    }

    #[test]
    fn test_buffer_size_halved_for_even_rates() {
        assert_eq!(
            AudioGrabber::buffer_size(&format(48_000, 16, 2)),
            48_000 * 2 // half a second of 4-byte frames
        );
        assert_eq!(
            AudioGrabber::buffer_size(&format(11_025, 16, 1)),
            11_025 * 2 // a full second for odd rates
        );
    }

    #[test]
    fn test_timestamps_follow_sample_count_not_wall_clock() {
        let fmt = format(48_000, 16, 1);
        let queue = Arc::new(WriterQueue::new(8));
        // Two short reads of 100 frames each.
        let mut g = grabber(fmt, vec![200, 200], 100, queue.clone(), Arc::new(StopSignal::new()));
        g.tick().unwrap();
        g.tick().unwrap();
        let first = queue.pop().unwrap();
        let second = queue.pop().unwrap();
        assert_eq!(first.timestamp, Rational::ZERO);
        assert_eq!(second.timestamp, Rational::new(100, 48_000));
        assert_eq!(second.sequence_number, first.sequence_number + 1);
        assert_eq!(first.end_timestamp(), second.timestamp);
    }

    #[test]
    fn test_truncates_exactly_at_whole_sample_boundary() {
        // 48 kHz mono 16-bit: reads of 0.45 s, 0.45 s, then 0.2 s put the
        // last buffer at [0.9 s, 1.1 s). A stop boundary at 1.0 s truncates
        // it to exactly 1.0 s: 4800 samples fewer than the raw read.
        let fmt = format(48_000, 16, 1);
        let queue = Arc::new(WriterQueue::new(8));
        let stop = Arc::new(StopSignal::new());
        let mut g = grabber(
            fmt,
            vec![21_600 * 2, 21_600 * 2, 9_600 * 2],
            100,
            queue.clone(),
            stop.clone(),
        );
        assert_eq!(g.tick().unwrap(), Tick::Continue);
        assert_eq!(g.tick().unwrap(), Tick::Continue);

        stop.set(1_000);
        assert_eq!(g.tick().unwrap(), Tick::Cancel);

        queue.pop().unwrap();
        queue.pop().unwrap();
        let last = queue.pop().unwrap();
        assert_eq!(last.timestamp, Rational::new(9, 10));
        assert_eq!(last.sample_count, 9_600 - 4_800);
        assert_eq!(last.end_timestamp(), Rational::from_int(1));
        match &last.payload {
            SamplePayload::Bytes(b) => assert_eq!(b.len(), 4_800 * 2),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn keeps_one_sample_past_fractional_boundary() {
        // 44.1 kHz: a millisecond stop boundary lands between sample edges
        // (0.001 s = 44.1 samples). The ceiling rounds up, so the final
        // sample ends just past the boundary. Pinned deliberately.
        let fmt = format(44_100, 8, 1);
        let queue = Arc::new(WriterQueue::new(8));
        let stop = Arc::new(StopSignal::new());
        let mut g = grabber(fmt, vec![22_050, 22_050], 100, queue.clone(), stop.clone());
        assert_eq!(g.tick().unwrap(), Tick::Continue);

        stop.set(501);
        assert_eq!(g.tick().unwrap(), Tick::Cancel);

        queue.pop().unwrap();
        let last = queue.pop().unwrap();
        // ceil(0.001 * 44100) = 45, not 44.
        assert_eq!(last.sample_count, 45);
        assert!(last.end_timestamp() > Rational::new(501, 1000));
    }

    #[test]
    fn test_zero_length_truncation_drops_sample() {
        let fmt = format(48_000, 16, 1);
        let queue = Arc::new(WriterQueue::new(8));
        let stop = Arc::new(StopSignal::new());
        let mut g = grabber(fmt, vec![24_000 * 2, 24_000 * 2], 100, queue.clone(), stop.clone());
        assert_eq!(g.tick().unwrap(), Tick::Continue);

        // Boundary exactly at the next buffer's start time.
        stop.set(500);
        assert_eq!(g.tick().unwrap(), Tick::Cancel);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_meter_constant_signal_16bit() {
        let fmt = format(8_000, 16, 2);
        let data: Vec<u8> = (0..400).flat_map(|_| 16384i16.to_le_bytes()).collect();
        let (left, right) = compute_levels(&fmt, &data);
        assert!((left.unwrap() - 0.5).abs() < 1e-3);
        assert!((right.unwrap() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_meter_8bit_skips_silence_value() {
        let fmt = format(8_000, 8, 1);
        // All bytes are -128, the line's silence value: level reads zero.
        let silent = vec![0x80u8; 64];
        let (left, _) = compute_levels(&fmt, &silent);
        assert_eq!(left.unwrap(), 0.0);

        let loud = vec![64i8 as u8; 64];
        let (left, right) = compute_levels(&fmt, &loud);
        assert!((left.unwrap() - 0.5).abs() < 1e-3);
        assert_eq!(right, None);
    }

    #[test]
    fn test_meter_unspecified_for_unsupported_encoding() {
        let fmt = AudioFormat {
            encoding: PcmEncoding::Float,
            ..format(48_000, 32, 2)
        };
        assert_eq!(compute_levels(&fmt, &[0; 64]), (None, None));

        let meter = LevelMeter::new();
        assert_eq!(meter.levels(), AudioLevels::unspecified());
    }
}
