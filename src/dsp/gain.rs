//! Gain Unit
//!
//! Static level change with a dB interface. The unit reports its own gain as
//! its trim, so the controller wires it in level-neutral: moving `gain_db`
//! after connection is what changes the level.

use crate::dsp::unit::{ParamDescriptor, ParamUnit, ProcessingUnit};
use crate::engine::buffer::db_to_linear;
use crate::engine::AudioBuffer;

/// Accepted gain range (dB)
const GAIN_RANGE_DB: (f32, f32) = (-24.0, 24.0);

/// Fixed gain
///
/// # Parameters
/// - `gain_db`: -24 to +24 dB
#[derive(Debug, Clone)]
pub struct GainUnit {
    db: f32,
    factor: f32,
    bypassed: bool,
}

impl GainUnit {
    /// Gain unit at `gain_db`, clamped to the accepted range
    pub fn new(gain_db: f32) -> Self {
        let db = gain_db.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1);
        Self {
            db,
            factor: db_to_linear(db),
            bypassed: false,
        }
    }

    pub fn gain_db(&self) -> f32 {
        self.db
    }

    /// Multiplier applied to every sample
    pub fn factor(&self) -> f32 {
        self.factor
    }
}

impl Default for GainUnit {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl ProcessingUnit for GainUnit {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if !self.bypassed && self.factor != 1.0 {
            buffer.scale(self.factor);
        }
    }

    fn set_bypass(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    fn reported_gain_trim_db(&self) -> f32 {
        self.db
    }

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        vec![ParamDescriptor::continuous(
            "gain_db",
            GAIN_RANGE_DB.0,
            GAIN_RANGE_DB.1,
            ParamUnit::Decibels,
        )]
    }

    fn set_parameter(&mut self, key: &str, value: f32) {
        if key == "gain_db" {
            *self = Self {
                bypassed: self.bypassed,
                ..Self::new(value)
            };
        }
    }

    fn display_kind(&self) -> &str {
        "gain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ones(frames: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![1.0; frames], vec![1.0; frames]], 48000).unwrap()
    }

    #[test]
    fn test_new_and_clamp() {
        assert_relative_eq!(GainUnit::new(-6.0).factor(), 0.501187, epsilon = 1e-5);
        assert_eq!(GainUnit::new(-200.0).gain_db(), GAIN_RANGE_DB.0);
        assert_eq!(GainUnit::new(100.0).gain_db(), GAIN_RANGE_DB.1);
    }

    #[test]
    fn test_scales_buffer() {
        let mut unit = GainUnit::new(-6.0);
        let mut buffer = ones(64);
        unit.process(&mut buffer);
        for &s in buffer.samples.iter().flatten() {
            assert_relative_eq!(s, 0.501187, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_bypass_is_transparent() {
        let mut unit = GainUnit::new(-12.0);
        unit.set_bypass(true);
        let mut buffer = ones(64);
        unit.process(&mut buffer);
        assert!(buffer.samples.iter().flatten().all(|&s| s == 1.0));
    }

    #[test]
    fn test_parameter_moves_reported_trim() {
        let mut unit = GainUnit::new(6.0);
        unit.set_bypass(true);
        unit.set_parameter("gain_db", -3.0);
        assert_eq!(unit.reported_gain_trim_db(), -3.0);
        assert_relative_eq!(unit.factor(), db_to_linear(-3.0));
        assert!(unit.bypassed);
    }
}
