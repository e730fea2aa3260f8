//! Engine configuration
//!
//! Everything the engine needs to size its render-side buffers up front lives
//! here, so that nothing has to be allocated once audio is running.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default processing sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Largest block the renderer processes in one pass
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 512;

/// Default chain capacity
pub const DEFAULT_MAX_UNITS: usize = 16;

/// Default metering clock rate (Hz)
pub const DEFAULT_METERING_RATE_HZ: f32 = 20.0;

/// Default gain node smoothing time constant (ms)
pub const DEFAULT_GAIN_SMOOTHING_MS: f32 = 10.0;

/// Runtime configuration for an [`Engine`](crate::engine::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate of the stream in Hz
    pub sample_rate: u32,
    /// Channel count of the stream (1 or 2)
    pub channels: usize,
    /// Maximum frames per render pass; larger callbacks are split
    pub max_block_size: usize,
    /// Maximum number of connected units
    pub max_units: usize,
    /// Rate at which the metering clock pulls tap windows
    pub metering_rate_hz: f32,
    /// One-pole time constant for gain node changes
    pub gain_smoothing_ms: f32,
    /// Capacity of the render -> control event ring
    pub event_queue_capacity: usize,
    /// Metering points created at init
    pub default_metering_points: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            max_units: DEFAULT_MAX_UNITS,
            metering_rate_hz: DEFAULT_METERING_RATE_HZ,
            gain_smoothing_ms: DEFAULT_GAIN_SMOOTHING_MS,
            event_queue_capacity: 1024,
            default_metering_points: vec!["input".to_string(), "output".to_string()],
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file, filling missing fields with defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is usable by the renderer
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(EngineError::InvalidConfig { reason });

        if self.sample_rate == 0 {
            return fail("sample_rate must be positive".to_string());
        }
        if !(1..=2).contains(&self.channels) {
            return fail(format!("channels must be 1 or 2, got {}", self.channels));
        }
        if self.max_block_size == 0 {
            return fail("max_block_size must be positive".to_string());
        }
        if self.max_units == 0 {
            return fail("max_units must be positive".to_string());
        }
        if !(self.metering_rate_hz.is_finite() && self.metering_rate_hz > 0.0) {
            return fail(format!(
                "metering_rate_hz must be positive, got {}",
                self.metering_rate_hz
            ));
        }
        if !(self.gain_smoothing_ms.is_finite() && self.gain_smoothing_ms >= 0.0) {
            return fail(format!(
                "gain_smoothing_ms must be non-negative, got {}",
                self.gain_smoothing_ms
            ));
        }
        if self.event_queue_capacity == 0 {
            return fail("event_queue_capacity must be positive".to_string());
        }
        Ok(())
    }

    /// Frames in one metering analysis window
    pub fn meter_window_frames(&self) -> usize {
        ((self.sample_rate as f32 / self.metering_rate_hz).round() as usize).max(1)
    }

    /// Duration of one full block, used for deadline accounting
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.max_block_size as f64 / self.sample_rate as f64)
    }
}
