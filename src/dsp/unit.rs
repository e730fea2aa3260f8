//! Processing unit capability
//!
//! The engine treats every processing unit opaquely through the
//! [`ProcessingUnit`] trait. Units are handed to the engine on the control
//! thread and from then on are only touched by the render thread.

use serde::{Deserialize, Serialize};

use crate::engine::AudioBuffer;

/// Unit of measure for a parameter, used by UIs to format values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamUnit {
    #[default]
    None,
    Decibels,
    Hertz,
    Milliseconds,
    Ratio,
    Percent,
}

/// Declared bounds of one unit parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    /// Field key used by `set_parameter`
    pub key: String,
    /// Inclusive lower bound
    pub min: f32,
    /// Inclusive upper bound
    pub max: f32,
    /// Quantization step; 0.0 means continuous
    pub step: f32,
    /// Unit of measure
    pub unit: ParamUnit,
}

impl ParamDescriptor {
    /// Continuous parameter
    pub fn continuous(key: &str, min: f32, max: f32, unit: ParamUnit) -> Self {
        Self {
            key: key.to_string(),
            min,
            max,
            step: 0.0,
            unit,
        }
    }

    /// Parameter restricted to `min + k * step`
    pub fn stepped(key: &str, min: f32, max: f32, step: f32, unit: ParamUnit) -> Self {
        Self {
            key: key.to_string(),
            min,
            max,
            step,
            unit,
        }
    }

    /// Check a candidate value against the declared bounds
    ///
    /// Out-of-range values are refused, never clamped.
    pub fn check(&self, value: f32) -> std::result::Result<(), String> {
        if !value.is_finite() {
            return Err("value must be finite".to_string());
        }
        if value < self.min || value > self.max {
            return Err(format!("outside declared range {}..={}", self.min, self.max));
        }
        if self.step > 0.0 {
            let steps = (value - self.min) / self.step;
            if (steps - steps.round()).abs() > 1e-3 {
                return Err(format!("not a multiple of step {} from {}", self.step, self.min));
            }
        }
        Ok(())
    }
}

/// Capability implemented by every processing unit in a chain
///
/// `process` runs on the render thread and must not allocate, block or
/// perform I/O. Everything else is either called once on the control thread
/// before the unit is wired in (`describe_parameters`, `reported_gain_trim_db`,
/// `prepare`) or applied by the render thread between blocks.
pub trait ProcessingUnit: Send {
    /// Process audio buffer in-place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Notify the unit of a bypass change
    ///
    /// The engine already skips `process` while a unit is bypassed; units may
    /// use this to reset tails or release meters.
    fn set_bypass(&mut self, bypassed: bool);

    /// Level change (dB) the unit applies on its own at its current settings
    ///
    /// The gain stage controller subtracts this at the unit's output gain node
    /// when the unit is wired in, so insertion is level-neutral.
    fn reported_gain_trim_db(&self) -> f32 {
        0.0
    }

    /// Declared parameters and their bounds
    fn describe_parameters(&self) -> Vec<ParamDescriptor>;

    /// Apply an already validated parameter value
    fn set_parameter(&mut self, key: &str, value: f32);

    /// Short kind identifier shown by UIs (e.g. "eq", "limiter")
    fn display_kind(&self) -> &str;

    /// Prepare for processing at a sample rate and maximum block size
    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize) {}

    /// Clear internal state (filter history, envelopes)
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_accepts_bounds() {
        let desc = ParamDescriptor::continuous("gain_db", -24.0, 24.0, ParamUnit::Decibels);
        assert!(desc.check(-24.0).is_ok());
        assert!(desc.check(24.0).is_ok());
        assert!(desc.check(0.5).is_ok());
    }

    #[test]
    fn test_check_refuses_out_of_range() {
        let desc = ParamDescriptor::continuous("gain_db", -24.0, 24.0, ParamUnit::Decibels);
        assert!(desc.check(24.5).is_err());
        assert!(desc.check(f32::NAN).is_err());
        assert!(desc.check(f32::INFINITY).is_err());
    }

    #[test]
    fn test_check_step_grid() {
        let desc = ParamDescriptor::stepped("ratio", 1.0, 20.0, 0.5, ParamUnit::Ratio);
        assert!(desc.check(4.5).is_ok());
        assert!(desc.check(4.2).is_err());
    }
}
