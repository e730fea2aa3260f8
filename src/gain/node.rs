//! Smoothed gain node
//!
//! A scalar multiplier with a one-pole approach to its target, so gain
//! changes never step. A node settled at unity leaves samples untouched.

use crate::engine::AudioBuffer;

/// Distance to target under which the ramp snaps
const SETTLE_EPSILON: f32 = 1e-6;

/// Scalar gain with an optional smoothing time constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainNode {
    current: f32,
    target: f32,
    coeff: f32,
}

impl GainNode {
    /// Create a node already settled at `gain`
    ///
    /// # Arguments
    /// * `gain` - Initial linear gain
    /// * `smoothing_ms` - Time constant; 0 makes changes immediate
    /// * `sample_rate` - Rate the node is advanced at
    pub fn new(gain: f32, smoothing_ms: f32, sample_rate: u32) -> Self {
        let samples = smoothing_ms * sample_rate as f32 / 1000.0;
        let coeff = if samples > 0.0 {
            (-1.0 / samples).exp()
        } else {
            0.0
        };
        Self {
            current: gain,
            target: gain,
            coeff,
        }
    }

    /// Unity node
    pub fn unity(smoothing_ms: f32, sample_rate: u32) -> Self {
        Self::new(1.0, smoothing_ms, sample_rate)
    }

    /// Set the gain the node ramps towards
    #[inline]
    pub fn set_target(&mut self, gain: f32) {
        self.target = gain;
    }

    /// Jump straight to `gain` without ramping
    #[inline]
    pub fn jump_to(&mut self, gain: f32) {
        self.current = gain;
        self.target = gain;
    }

    /// Gain currently applied
    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Gain being approached
    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True once the ramp has reached its target
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }

    /// Apply the node to a block in place
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.is_settled() {
            if self.current != 1.0 {
                buffer.scale(self.current);
            }
            return;
        }

        for i in 0..buffer.len() {
            self.current = self.target + (self.current - self.target) * self.coeff;
            if (self.current - self.target).abs() < SETTLE_EPSILON {
                self.current = self.target;
            }
            for channel in &mut buffer.samples {
                channel[i] *= self.current;
            }
        }
    }
}
