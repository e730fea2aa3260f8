//! Single-band EQ Unit
//!
//! One biquad section per channel using the Audio EQ Cookbook formulas.
//! Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::dsp::unit::{ParamDescriptor, ParamUnit, ProcessingUnit};
use crate::engine::AudioBuffer;

/// Filter shape for the band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Bell curve boost/cut
    #[default]
    Peak,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
    /// Remove above frequency
    LowPass,
    /// Remove below frequency
    HighPass,
}

impl FilterType {
    /// Map the stepped `filter_type` parameter onto a shape
    fn from_index(index: f32) -> Self {
        match index.round() as i32 {
            1 => FilterType::LowShelf,
            2 => FilterType::HighShelf,
            3 => FilterType::LowPass,
            4 => FilterType::HighPass,
            _ => FilterType::Peak,
        }
    }
}

/// Normalized biquad coefficients (divided by a0)
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        let freq = frequency.clamp(20.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn tick(&mut self, c: &BiquadCoeffs, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Single-band equalizer
///
/// # Parameters
/// - `frequency`: Center/corner frequency (20 to 20000 Hz)
/// - `gain_db`: Boost/cut (-24 to +24 dB, ignored by pass filters)
/// - `q`: Bandwidth (0.1 to 10)
/// - `filter_type`: 0 peak, 1 low shelf, 2 high shelf, 3 low pass, 4 high pass
#[derive(Debug, Clone)]
pub struct EqUnit {
    filter_type: FilterType,
    frequency: f32,
    gain_db: f32,
    q: f32,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    state: [BiquadState; 2],
    bypassed: bool,
}

impl EqUnit {
    /// Create a band with the given shape and settings
    pub fn new(filter_type: FilterType, frequency: f32, gain_db: f32, q: f32) -> Self {
        let mut eq = Self {
            filter_type,
            frequency,
            gain_db,
            q,
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
            coeffs: BiquadCoeffs::default(),
            state: [BiquadState::default(); 2],
            bypassed: false,
        };
        eq.update_coefficients();
        eq
    }

    /// Current filter shape
    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    fn update_coefficients(&mut self) {
        self.coeffs = BiquadCoeffs::calculate(
            self.filter_type,
            self.sample_rate as f64,
            self.frequency as f64,
            self.gain_db as f64,
            self.q as f64,
        );
    }
}

impl Default for EqUnit {
    fn default() -> Self {
        Self::new(FilterType::Peak, 1000.0, 0.0, 0.707)
    }
}

impl ProcessingUnit for EqUnit {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.bypassed {
            return;
        }
        let coeffs = self.coeffs;
        for (ch, state) in self.state.iter_mut().enumerate().take(buffer.num_channels()) {
            for sample in buffer.channel_mut(ch).iter_mut() {
                *sample = state.tick(&coeffs, *sample as f64) as f32;
            }
        }
    }

    fn set_bypass(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    fn describe_parameters(&self) -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::continuous("frequency", 20.0, 20000.0, ParamUnit::Hertz),
            ParamDescriptor::continuous("gain_db", -24.0, 24.0, ParamUnit::Decibels),
            ParamDescriptor::continuous("q", 0.1, 10.0, ParamUnit::Ratio),
            ParamDescriptor::stepped("filter_type", 0.0, 4.0, 1.0, ParamUnit::None),
        ]
    }

    fn set_parameter(&mut self, key: &str, value: f32) {
        match key {
            "frequency" => self.frequency = value,
            "gain_db" => self.gain_db = value,
            "q" => self.q = value,
            "filter_type" => self.filter_type = FilterType::from_index(value),
            _ => return,
        }
        self.update_coefficients();
    }

    fn display_kind(&self) -> &str {
        "eq"
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.state = [BiquadState::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;

    #[test]
    fn test_flat_peak_is_transparent() {
        let mut eq = EqUnit::default();
        let input = AudioBuffer::sine(440.0, 0.5, 4800, ChannelLayout::Stereo, 48000);
        let mut output = input.clone();
        eq.process(&mut output);

        for (a, b) in input.channel(0).iter().zip(output.channel(0)) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_peak_boost_raises_level_at_center() {
        let mut eq = EqUnit::new(FilterType::Peak, 1000.0, 6.0, 1.0);
        eq.prepare(48000, 512);
        let mut tone = AudioBuffer::sine(1000.0, 0.25, 48000, ChannelLayout::Mono, 48000);
        let before = tone.rms();
        eq.process(&mut tone);
        let gain_db = 20.0 * (tone.rms() / before).log10();
        assert!((gain_db - 6.0).abs() < 0.5, "gain was {gain_db}");
    }

    #[test]
    fn test_filter_type_parameter() {
        let mut eq = EqUnit::default();
        eq.set_parameter("filter_type", 4.0);
        assert_eq!(eq.filter_type(), FilterType::HighPass);
    }
}
