//! Transport State Machine
//!
//! Play/pause/stop/seek for the engine. State lives in atomics shared by the
//! control-side [`Transport`] handle and the renderer: the control side
//! requests, the render side applies at the start of its next callback and
//! is the only writer of the playhead.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Marker for "no seek requested"
const NO_SEEK: u64 = u64::MAX;

/// Transport states representing the current playback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Transport is paused (default state); the renderer emits silence
    #[default]
    Paused,
    /// Audio is actively playing
    Playing,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            _ => TransportState::Paused,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TransportState::Paused => 0,
            TransportState::Playing => 1,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Paused => write!(f, "Paused"),
            TransportState::Playing => write!(f, "Playing"),
        }
    }
}

#[derive(Debug)]
struct TransportShared {
    state: AtomicU8,
    /// Playhead in frames; written by the renderer only
    position: AtomicU64,
    pending_seek: AtomicU64,
}

/// Shared transport handle
///
/// Cloning yields another handle onto the same transport.
#[derive(Debug, Clone)]
pub struct Transport {
    shared: Arc<TransportShared>,
    sample_rate: u32,
}

impl Transport {
    /// Create a paused transport at position 0
    ///
    /// # Arguments
    /// * `sample_rate` - The sample rate in Hz, used for second/frame conversion
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(TransportShared {
                state: AtomicU8::new(TransportState::Paused.as_u8()),
                position: AtomicU64::new(0),
                pending_seek: AtomicU64::new(NO_SEEK),
            }),
            sample_rate,
        }
    }

    // ========================================================================
    // Standard Transport Controls
    // ========================================================================

    /// Start playback from the current position
    ///
    /// State transition: Paused -> Playing
    pub fn play(&self) {
        let previous = self.swap_state(TransportState::Playing);
        if previous != TransportState::Playing {
            debug!(position = self.position_seconds(), "transport playing");
        }
    }

    /// Pause playback, keeping the playhead
    ///
    /// State transition: Playing -> Paused
    pub fn pause(&self) {
        let previous = self.swap_state(TransportState::Paused);
        if previous != TransportState::Paused {
            debug!(position = self.position_seconds(), "transport paused");
        }
    }

    /// Pause and return the playhead to the start
    pub fn stop(&self) {
        self.swap_state(TransportState::Paused);
        self.shared.pending_seek.store(0, Ordering::Release);
        debug!("transport stopped");
    }

    /// Move the playhead to `position` seconds (clamped to >= 0)
    pub fn seek(&self, position: f64) {
        let frames = (position.max(0.0) * self.sample_rate as f64).round() as u64;
        self.seek_frames(frames);
    }

    /// Move the playhead to an absolute frame
    pub fn seek_frames(&self, frame: u64) {
        self.shared
            .pending_seek
            .store(frame.min(NO_SEEK - 1), Ordering::Release);
        debug!(frame, "transport seek requested");
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    /// Get the current transport state
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Check if transport is currently playing
    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Check if transport is currently paused
    pub fn is_paused(&self) -> bool {
        self.state() == TransportState::Paused
    }

    /// Playhead in frames, including a seek the renderer has not applied yet
    pub fn position_frames(&self) -> u64 {
        match self.shared.pending_seek.load(Ordering::Acquire) {
            NO_SEEK => self.shared.position.load(Ordering::Acquire),
            frame => frame,
        }
    }

    /// Playhead in seconds
    pub fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    // ========================================================================
    // Render side
    // ========================================================================

    /// Apply a pending seek and report the playhead if playing
    pub(crate) fn begin_block(&self) -> Option<u64> {
        let seek = self.shared.pending_seek.swap(NO_SEEK, Ordering::AcqRel);
        if seek != NO_SEEK {
            self.shared.position.store(seek, Ordering::Release);
        }
        self.is_playing()
            .then(|| self.shared.position.load(Ordering::Acquire))
    }

    /// Advance the playhead after rendering `frames`
    pub(crate) fn advance(&self, frames: u64) {
        self.shared.position.fetch_add(frames, Ordering::AcqRel);
    }

    fn swap_state(&self, state: TransportState) -> TransportState {
        TransportState::from_u8(self.shared.state.swap(state.as_u8(), Ordering::AcqRel))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_paused() {
        let transport = Transport::new(48000);
        assert!(transport.is_paused());
        assert_eq!(transport.position_frames(), 0);
        assert_eq!(transport.begin_block(), None);
    }

    #[test]
    fn test_paused_to_playing() {
        let transport = Transport::new(48000);
        transport.play();
        assert!(transport.is_playing());
        assert_eq!(transport.begin_block(), Some(0));
    }

    #[test]
    fn test_clones_share_state() {
        let control = Transport::new(48000);
        let render = control.clone();
        control.play();
        assert!(render.is_playing());
        control.pause();
        assert!(render.is_paused());
    }

    #[test]
    fn test_seek_applied_at_next_block() {
        let transport = Transport::new(48000);
        transport.play();
        transport.seek(0.5);
        assert_eq!(transport.position_frames(), 24000);
        assert_eq!(transport.begin_block(), Some(24000));
        transport.advance(512);
        assert_eq!(transport.position_frames(), 24512);
    }

    #[test]
    fn test_seek_negative_clamped() {
        let transport = Transport::new(48000);
        transport.seek(-3.0);
        assert_eq!(transport.position_frames(), 0);
    }

    #[test]
    fn test_stop_resets_playhead() {
        let transport = Transport::new(48000);
        transport.play();
        transport.begin_block();
        transport.advance(4800);
        transport.stop();
        assert!(transport.is_paused());
        assert_eq!(transport.position_seconds(), 0.0);
        assert_eq!(transport.begin_block(), None);
        assert_eq!(transport.position_frames(), 0);
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Paused.to_string(), "Paused");
        assert_eq!(TransportState::Playing.to_string(), "Playing");
    }
}
