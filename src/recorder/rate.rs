//! Variable to fixed frame-rate conversion
//!
//! Screen capture produces samples with whatever duration the scheduler
//! actually achieved. Containers that mandate a constant sample duration get
//! the stream re-timed here: each input interval is tiled with fixed-duration
//! outputs, and every output after the first for a given input is a
//! `DUPLICATE` referencing the unchanged pixels.

use crate::media::{Rational, Sample, SampleFlags};

pub struct RateConverter {
    /// `None` makes the converter a 1:1 passthrough.
    fixed_duration: Option<Rational>,
    /// Output-time cursor, starts at zero each session.
    output_time: Rational,
    output_sequence: u64,
}

impl RateConverter {
    pub fn passthrough() -> Self {
        RateConverter {
            fixed_duration: None,
            output_time: Rational::ZERO,
            output_sequence: 0,
        }
    }

    pub fn fixed(frame_rate: Rational) -> Self {
        RateConverter {
            fixed_duration: Some(frame_rate.inverse()),
            output_time: Rational::ZERO,
            output_sequence: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.fixed_duration.is_some()
    }

    /// Resets the output clock for a new session.
    pub fn reset(&mut self) {
        self.output_time = Rational::ZERO;
        self.output_sequence = 0;
    }

    /// Converts one input sample into zero or more output samples.
    ///
    /// The converter emits more samples than it consumes, so it assigns its
    /// own output sequence numbers; per-track numbering stays strictly
    /// increasing downstream.
    pub fn convert(&mut self, sample: Sample) -> Vec<Sample> {
        let Some(fixed) = self.fixed_duration else {
            return vec![sample];
        };

        let input_end = sample.end_timestamp();
        let mut out = Vec::new();
        let mut first = true;
        while self.output_time < input_end {
            let mut emitted = sample.clone();
            emitted.timestamp = self.output_time;
            emitted.duration = fixed;
            emitted.sample_count = 1;
            emitted.sequence_number = self.output_sequence;
            if !first {
                emitted.flags.insert(SampleFlags::DUPLICATE);
            }
            first = false;
            self.output_sequence += 1;
            self.output_time = self.output_time + fixed;
            out.push(emitted);
        }
        out
    }
}
