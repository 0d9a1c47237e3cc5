//! Timestamp remapping between the decode timeline and the output timeline.
//!
//! Two numbers drive everything:
//!
//! - `pts_scale_factor`: output ticks per input tick after the speed change,
//!   `output_den / (speed * input_den)` for unit-numerator time bases.
//! - `output_interval`: spacing of admitted frames, measured in input ticks,
//!   `output_den / (pts_scale_factor * fps)`.
//!
//! Gating runs on the input timeline so a frame can be accepted or dropped
//! before its output timestamp exists.

use crate::error::ConvertError;
use crate::frame::Rational;

/// Relative slack for the gating comparison; absorbs float drift in
/// `k * output_interval`.
const GATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    input: Rational,
    output: Rational,
    speed: f64,
    fps: u32,
    /// `output_tb.den * input_tb.num`
    scale_num: f64,
    /// `speed * input_tb.den * output_tb.num`
    scale_den: f64,
}

impl Timeline {
    pub fn new(input: Rational, output: Rational, speed: f32, fps: u32) -> Result<Self, ConvertError> {
        if !input.is_valid() || !output.is_valid() {
            return Err(ConvertError::Config(format!(
                "time bases must be positive (input {input}, output {output})"
            )));
        }
        if !(speed.is_finite() && speed > 0.0) {
            return Err(ConvertError::Config(format!("speed must be positive, got {speed}")));
        }
        if fps == 0 {
            return Err(ConvertError::Config("fps must be at least 1".into()));
        }

        let speed = speed as f64;
        Ok(Self {
            input,
            output,
            speed,
            fps,
            scale_num: output.den as f64 * input.num as f64,
            scale_den: speed * input.den as f64 * output.num as f64,
        })
    }

    pub fn input_time_base(&self) -> Rational {
        self.input
    }

    pub fn output_time_base(&self) -> Rational {
        self.output
    }

    /// Output ticks per input tick.
    pub fn pts_scale_factor(&self) -> f64 {
        self.scale_num / self.scale_den
    }

    /// Distance between admitted frames, in input ticks.
    ///
    /// Algebraically `output_ticks_per_second / (pts_scale_factor * fps)`;
    /// evaluated as `speed * input_ticks_per_second / fps` to keep integral
    /// intervals exact.
    pub fn output_interval(&self) -> f64 {
        self.speed * self.input.ticks_per_second() / self.fps as f64
    }

    /// Map an input pts onto the output timeline.
    pub fn remap(&self, input_pts: i64) -> i64 {
        (input_pts as f64 * self.scale_num / self.scale_den).round() as i64
    }

    /// Display duration of one output frame, in output ticks.
    pub fn frame_delay(&self) -> i64 {
        (self.output.ticks_per_second() / self.fps as f64).round() as i64
    }

    /// Input-timeline threshold the next admitted frame must reach, once
    /// `admitted` frames have been accepted.
    pub fn threshold(&self, admitted: u64) -> f64 {
        admitted as f64 * self.output_interval()
    }

    /// Frame-rate decimation test.
    pub fn admits(&self, input_pts: i64, admitted: u64) -> bool {
        let threshold = self.threshold(admitted);
        input_pts as f64 >= threshold - threshold.abs().max(1.0) * GATE_EPSILON
    }
}
