//! Metering snapshots handed to the control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tap::WindowReading;
use crate::engine::buffer::{linear_to_db, FLOOR_DB};

/// Levels of one metering point over its latest complete window
///
/// All levels are dBFS with a floor of -120 dB. Immutable once published;
/// superseded by the next snapshot of the same point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringSnapshot {
    pub point: String,
    pub peak_left_db: f32,
    pub peak_right_db: f32,
    pub rms_left_db: f32,
    pub rms_right_db: f32,
    /// Non-zero only at the `masterLimiter` point
    pub gain_reduction_db: f32,
    /// Stream frame at the end of the window
    pub timestamp_frames: u64,
    /// When the control plane read the window
    pub captured_at: DateTime<Utc>,
}

impl MeteringSnapshot {
    /// Snapshot for a point that has not completed a window yet
    pub fn silent(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            peak_left_db: FLOOR_DB,
            peak_right_db: FLOOR_DB,
            rms_left_db: FLOOR_DB,
            rms_right_db: FLOOR_DB,
            gain_reduction_db: 0.0,
            timestamp_frames: 0,
            captured_at: Utc::now(),
        }
    }

    /// Convert a tap reading to dBFS
    pub fn from_reading(point: impl Into<String>, reading: &WindowReading) -> Self {
        Self {
            point: point.into(),
            peak_left_db: linear_to_db(reading.peak[0]),
            peak_right_db: linear_to_db(reading.peak[1]),
            rms_left_db: linear_to_db(reading.rms[0]),
            rms_right_db: linear_to_db(reading.rms[1]),
            gain_reduction_db: reading.gain_reduction_db.max(0.0),
            timestamp_frames: reading.end_frame,
            captured_at: Utc::now(),
        }
    }

    /// Approximate stereo levels from an interleaved buffer
    ///
    /// Even-indexed samples are treated as left and odd-indexed as right.
    /// This is only correct for interleaved stereo; for collaborators that
    /// hold nothing else. The engine's own taps read planar channels.
    pub fn from_interleaved(point: impl Into<String>, samples: &[f32], timestamp_frames: u64) -> Self {
        let mut peak = [0.0_f32; 2];
        let mut sum_squares = [0.0_f64; 2];
        let mut counts = [0_usize; 2];
        for (i, &s) in samples.iter().enumerate() {
            let side = i % 2;
            peak[side] = peak[side].max(s.abs());
            sum_squares[side] += (s as f64) * (s as f64);
            counts[side] += 1;
        }
        let rms = |side: usize| {
            if counts[side] == 0 {
                0.0
            } else {
                (sum_squares[side] / counts[side] as f64).sqrt() as f32
            }
        };
        Self {
            point: point.into(),
            peak_left_db: linear_to_db(peak[0]),
            peak_right_db: linear_to_db(peak[1]),
            rms_left_db: linear_to_db(rms(0)),
            rms_right_db: linear_to_db(rms(1)),
            gain_reduction_db: 0.0,
            timestamp_frames,
            captured_at: Utc::now(),
        }
    }

    /// Louder of the two peak readings
    pub fn peak_db(&self) -> f32 {
        self.peak_left_db.max(self.peak_right_db)
    }
}
