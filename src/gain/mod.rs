//! Gain Stage Controller
//!
//! Owns the headroom policy and is the single conversion point between the
//! dB values the control plane speaks and the linear gains the render path
//! multiplies by. It decides:
//!
//! - the output gain that makes a unit's insertion level-neutral
//! - the user-facing trims (validated, never clamped)
//! - the two soft-clip safety stages at the end of the chain

pub mod node;
pub mod soft_clip;

pub use node::GainNode;
pub use soft_clip::{compute_soft_clip_curve, soft_clip, SafetyLimiter, DEFAULT_KNEE};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::buffer::db_to_linear;

/// Largest per-unit compensation the controller will wire in (dB)
pub const MAX_COMPENSATION_DB: f32 = 48.0;

/// Range accepted for user-facing trims (dB)
pub const TRIM_RANGE_DB: (f32, f32) = (-24.0, 24.0);

// ============================================================================
// Headroom Policy
// ============================================================================

/// Fixed level targets of the engine, all in dBFS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadroomPolicy {
    /// Expected average program level
    pub nominal_level: f32,
    /// Peak level the chain should stay under before the safety stages
    pub peak_headroom: f32,
    /// Ceiling of the master limiter
    pub safety_margin: f32,
    /// Ceiling of the outer true-peak stage
    pub true_peak_ceiling: f32,
}

/// The engine's headroom policy
pub const HEADROOM_POLICY: HeadroomPolicy = HeadroomPolicy {
    nominal_level: -18.0,
    peak_headroom: -6.0,
    safety_margin: -0.3,
    true_peak_ceiling: -0.1,
};

impl Default for HeadroomPolicy {
    fn default() -> Self {
        HEADROOM_POLICY
    }
}

/// Result of projecting nominal program level through the chain's static gain
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadroomStatus {
    /// Nominal level plus static chain gain
    pub projected_peak_db: f32,
    /// True when the projection crosses `peak_headroom`
    pub exceeds_headroom: bool,
}

// ============================================================================
// Compensation
// ============================================================================

/// Output gain wired after a unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compensation {
    /// Gain in dB (negated reported trim)
    pub db: f32,
    /// Same gain as linear amplitude
    pub linear: f32,
}

impl Compensation {
    /// Explicit unity
    pub const UNITY: Compensation = Compensation {
        db: 0.0,
        linear: 1.0,
    };
}

// ============================================================================
// Controller
// ============================================================================

/// Gain staging decisions for one engine
#[derive(Debug, Clone)]
pub struct GainStageController {
    policy: HeadroomPolicy,
    smoothing_ms: f32,
    sample_rate: u32,
}

impl GainStageController {
    /// Create a controller for a stream
    pub fn new(policy: HeadroomPolicy, smoothing_ms: f32, sample_rate: u32) -> Self {
        Self {
            policy,
            smoothing_ms,
            sample_rate,
        }
    }

    /// Headroom policy in effect
    pub fn policy(&self) -> HeadroomPolicy {
        self.policy
    }

    /// Output gain that cancels a unit's reported trim
    ///
    /// A unit reporting 0 dB gets explicit unity. A unit reporting a
    /// non-finite trim, or one beyond [`MAX_COMPENSATION_DB`], cannot be
    /// wired in level-neutral and is refused.
    pub fn apply_unity_compensation(
        &self,
        reported_trim_db: f32,
    ) -> std::result::Result<Compensation, String> {
        if !reported_trim_db.is_finite() {
            return Err(format!("reported gain trim {reported_trim_db} is not finite"));
        }
        if reported_trim_db.abs() > MAX_COMPENSATION_DB {
            return Err(format!(
                "reported gain trim {reported_trim_db:.1} dB exceeds +/-{MAX_COMPENSATION_DB} dB"
            ));
        }
        if reported_trim_db == 0.0 {
            return Ok(Compensation::UNITY);
        }
        let db = -reported_trim_db;
        Ok(Compensation {
            db,
            linear: db_to_linear(db),
        })
    }

    /// Validate a user-facing trim and convert it to linear gain
    pub fn trim_to_linear(&self, trim_db: f32) -> std::result::Result<f32, String> {
        let (min, max) = TRIM_RANGE_DB;
        if !trim_db.is_finite() || trim_db < min || trim_db > max {
            return Err(format!("trim must be within {min}..={max} dB"));
        }
        Ok(db_to_linear(trim_db))
    }

    /// Project the nominal level through `static_gain_db` of chain gain
    pub fn check_headroom(&self, static_gain_db: f32) -> HeadroomStatus {
        let projected_peak_db = self.policy.nominal_level + static_gain_db;
        let exceeds_headroom = projected_peak_db > self.policy.peak_headroom;
        if exceeds_headroom {
            warn!(
                projected_peak_db,
                peak_headroom = self.policy.peak_headroom,
                "chain gain pushes nominal level past peak headroom; safety limiters will engage"
            );
        }
        HeadroomStatus {
            projected_peak_db,
            exceeds_headroom,
        }
    }

    /// Sampled soft-clip transfer curve
    pub fn compute_soft_clip_curve(&self, knee_start: f32, sample_count: usize) -> Vec<f32> {
        compute_soft_clip_curve(knee_start, sample_count)
    }

    /// Inner limiter at the safety margin
    pub fn master_limiter(&self) -> SafetyLimiter {
        SafetyLimiter::new(self.policy.safety_margin, DEFAULT_KNEE)
    }

    /// Outer stage at the true-peak ceiling
    ///
    /// Its knee sits exactly at the master ceiling, so anything the master
    /// limiter emits passes through unchanged.
    pub fn true_peak_limiter(&self) -> SafetyLimiter {
        let knee = db_to_linear(self.policy.safety_margin)
            / db_to_linear(self.policy.true_peak_ceiling);
        SafetyLimiter::new(self.policy.true_peak_ceiling, knee.max(DEFAULT_KNEE))
    }

    /// Gain node configured with the engine's smoothing
    pub fn gain_node(&self, gain: f32) -> GainNode {
        GainNode::new(gain, self.smoothing_ms, self.sample_rate)
    }
}
