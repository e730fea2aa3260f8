//! Limiter Unit
//!
//! Brickwall peak limiter used as a reference dynamics unit in the chain.
//! This is the user-facing limiter; the engine's own safety limiting lives in
//! [`crate::gain`] and never depends on this unit being present.

use crate::dsp::unit::{ParamDescriptor, ParamUnit, ProcessingUnit};
use crate::engine::buffer::{db_to_linear, linear_to_db};
use crate::engine::AudioBuffer;

/// Accepted ceiling range (dBFS)
const CEILING_RANGE_DB: (f32, f32) = (-12.0, 0.0);

/// Accepted release range (ms)
const RELEASE_RANGE_MS: (f32, f32) = (10.0, 1000.0);

/// Attack of the gain envelope (ms); overshoot inside it is caught by the brickwall
const ATTACK_MS: f32 = 0.1;

/// One-pole smoothing factor for a time constant
#[inline]
fn pole(time_ms: f32, sample_rate: f32) -> f32 {
    (-1000.0 / (time_ms * sample_rate)).exp()
}

/// Stereo-linked peak limiter
///
/// The gain envelope is kept as a linear multiplier: it falls towards
/// `ceiling / peak` with a fast attack and recovers towards 1.0 with the
/// configured release. Both channels share one envelope so the image does
/// not shift under limiting.
///
/// # Parameters
/// - `ceiling_db`: Maximum output level (-12 to 0 dBFS)
/// - `release_ms`: Recovery time after a peak (10 to 1000 ms)
#[derive(Debug, Clone)]
pub struct Limiter {
    ceiling_db: f32,
    release_ms: f32,
    sample_rate: f32,
    ceiling: f32,
    attack_pole: f32,
    release_pole: f32,
    gain: f32,
    bypassed: bool,
}

impl Limiter {
    /// Limiter with the given ceiling, clamped to the accepted range
    pub fn new(ceiling_db: f32) -> Self {
        let mut limiter = Self {
            ceiling_db: ceiling_db.clamp(CEILING_RANGE_DB.0, CEILING_RANGE_DB.1),
            release_ms: 100.0,
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE as f32,
            ceiling: 1.0,
            attack_pole: 0.0,
            release_pole: 0.0,
            gain: 1.0,
            bypassed: false,
        };
        limiter.retune();
        limiter
    }

    pub fn ceiling_db(&self) -> f32 {
        self.ceiling_db
    }

    /// Ceiling as linear amplitude
    pub fn ceiling_linear(&self) -> f32 {
        self.ceiling
    }

    /// Current gain reduction in dB (0 when idle)
    pub fn gain_reduction_db(&self) -> f32 {
        -linear_to_db(self.gain)
    }

    fn retune(&mut self) {
        self.ceiling = db_to_linear(self.ceiling_db);
        self.attack_pole = pole(ATTACK_MS, self.sample_rate);
        self.release_pole = pole(self.release_ms, self.sample_rate);
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(-1.0)
    }
}

impl ProcessingUnit for Limiter {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.bypassed {
            return;
        }

        for i in 0..buffer.len() {
            let peak = buffer
                .samples
                .iter()
                .fold(0.0_f32, |acc, channel| acc.max(channel[i].abs()));
            let wanted = if peak > self.ceiling {
                self.ceiling / peak
            } else {
                1.0
            };
            let pole = if wanted < self.gain {
                self.attack_pole
            } else {
                self.release_pole
            };
            self.gain = wanted + pole * (self.gain - wanted);

            let limit = self.ceiling;
            for channel in &mut buffer.samples {
                let sample = channel[i] * self.gain;
                channel[i] = sample.clamp(-limit, limit);
            }
        }
    }

    fn set_bypass(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
        if bypassed {
            self.gain = 1.0;
        }
    }

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::continuous(
                "ceiling_db",
                CEILING_RANGE_DB.0,
                CEILING_RANGE_DB.1,
                ParamUnit::Decibels,
            ),
            ParamDescriptor::continuous(
                "release_ms",
                RELEASE_RANGE_MS.0,
                RELEASE_RANGE_MS.1,
                ParamUnit::Milliseconds,
            ),
        ]
    }

    fn set_parameter(&mut self, key: &str, value: f32) {
        match key {
            "ceiling_db" => self.ceiling_db = value,
            "release_ms" => self.release_ms = value,
            _ => return,
        }
        self.retune();
    }

    fn display_kind(&self) -> &str {
        "limiter"
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate as f32;
        self.retune();
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }
}
