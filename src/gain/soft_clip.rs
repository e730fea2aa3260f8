//! Soft-clip transfer curve and the safety limiters built on it
//!
//! The curve is linear up to the knee and compresses asymptotically towards
//! full scale with a hyperbolic tangent above it. Inputs beyond
//! [`SATURATION_POINT`] times full scale are hard-saturated. Shaping is a pure,
//! stateless function of each sample, so it adds no latency.

use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;

/// Default knee, as a fraction of the ceiling
pub const DEFAULT_KNEE: f32 = 0.9;

/// Normalized input level beyond which the curve hard-saturates
pub const SATURATION_POINT: f32 = 1.5;

/// Upper bound accepted for a knee; 1.0 would make the tanh segment degenerate
const MAX_KNEE: f32 = 0.999;

/// Shape one normalized sample (1.0 = ceiling)
#[inline]
pub fn soft_clip(x: f32, knee: f32) -> f32 {
    let x = x.clamp(-SATURATION_POINT, SATURATION_POINT);
    let magnitude = x.abs();
    if magnitude <= knee {
        return x;
    }
    let span = 1.0 - knee;
    let shaped = knee + span * ((magnitude - knee) / span).tanh();
    shaped.copysign(x)
}

/// Sample the transfer curve over `[-SATURATION_POINT, SATURATION_POINT]`
///
/// `knee_start` is clamped to `[0, 0.999]`; `sample_count` is raised to at
/// least two points so both ends of the domain are present.
pub fn compute_soft_clip_curve(knee_start: f32, sample_count: usize) -> Vec<f32> {
    let knee = clamp_knee(knee_start);
    let count = sample_count.max(2);
    let last = (count - 1) as f32;
    (0..count)
        .map(|i| {
            let x = -SATURATION_POINT + 2.0 * SATURATION_POINT * i as f32 / last;
            soft_clip(x, knee)
        })
        .collect()
}

#[inline]
fn clamp_knee(knee: f32) -> f32 {
    if knee.is_nan() {
        DEFAULT_KNEE
    } else {
        knee.clamp(0.0, MAX_KNEE)
    }
}

/// Soft-clip stage with a fixed ceiling
///
/// Used for both the master limiter and the outer true-peak stage; the two
/// differ only in ceiling and knee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimiter {
    ceiling: f32,
    knee: f32,
}

impl SafetyLimiter {
    /// Create a stage from a ceiling in dBFS and a knee fraction
    pub fn new(ceiling_db: f32, knee: f32) -> Self {
        Self {
            ceiling: db_to_linear(ceiling_db),
            knee: clamp_knee(knee),
        }
    }

    /// Ceiling as linear amplitude
    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    /// Knee as a fraction of the ceiling
    pub fn knee(&self) -> f32 {
        self.knee
    }

    /// Absolute level where shaping begins
    pub fn threshold(&self) -> f32 {
        self.ceiling * self.knee
    }

    /// Shape one sample
    #[inline]
    pub fn shape(&self, sample: f32) -> f32 {
        if sample.abs() <= self.threshold() {
            return sample;
        }
        soft_clip(sample / self.ceiling, self.knee) * self.ceiling
    }

    /// Shape a block in place and return the gain reduction in dB (>= 0)
    pub fn process(&self, buffer: &mut AudioBuffer) -> f32 {
        let threshold = self.threshold();
        let before = buffer.peak();
        if before <= threshold {
            return 0.0;
        }
        for channel in &mut buffer.samples {
            for sample in channel.iter_mut() {
                *sample = self.shape(*sample);
            }
        }
        (linear_to_db(before) - linear_to_db(buffer.peak())).max(0.0)
    }
}
