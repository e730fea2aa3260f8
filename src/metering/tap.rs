//! Passive metering tap
//!
//! The render context feeds every block that passes the tap's position. Once
//! a full analysis window has accumulated, its per-channel peak and RMS are
//! written into a small ring of atomic slots. The control context reads the
//! newest slot without ever blocking the writer.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::engine::AudioBuffer;

/// Completed windows kept per tap
const SLOTS: usize = 4;

/// One completed analysis window, linear amplitudes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReading {
    /// Publication count of this window (1 for the first)
    pub index: u64,
    pub peak: [f32; 2],
    pub rms: [f32; 2],
    /// Largest gain reduction fed during the window (dB, >= 0)
    pub gain_reduction_db: f32,
    /// Stream frame just past the window's last sample
    pub end_frame: u64,
}

#[derive(Debug, Default)]
struct WindowSlot {
    peak: [AtomicU32; 2],
    rms: [AtomicU32; 2],
    gain_reduction: AtomicU32,
    end_frame: AtomicU64,
}

#[derive(Debug, Default)]
struct WindowStats {
    peak: [f32; 2],
    sum_squares: [f64; 2],
    gain_reduction_db: f32,
    frames: usize,
}

/// Tap at one metering point
#[derive(Debug)]
pub struct MeterTap {
    window_frames: usize,
    slots: [WindowSlot; SLOTS],
    published: AtomicU64,
    /// Highest window index handed to the control plane
    delivered: AtomicU64,
    stats: Mutex<WindowStats>,
}

impl MeterTap {
    /// Create a tap with a window of `window_frames` frames
    pub fn new(window_frames: usize) -> Self {
        Self {
            window_frames: window_frames.max(1),
            slots: Default::default(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            stats: Mutex::new(WindowStats::default()),
        }
    }

    pub fn window_frames(&self) -> usize {
        self.window_frames
    }

    /// Number of windows published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Feed a block (render context)
    ///
    /// # Arguments
    /// * `buffer` - Block passing the tap; channel 0 is left, the last channel right
    /// * `start_frame` - Stream position of the block's first frame
    pub fn feed(&self, buffer: &AudioBuffer, start_frame: u64) {
        self.feed_with_reduction(buffer, start_frame, 0.0);
    }

    /// Feed a block along with the gain reduction applied to it
    pub fn feed_with_reduction(&self, buffer: &AudioBuffer, start_frame: u64, reduction_db: f32) {
        let Some(mut stats) = self.stats.try_lock() else {
            return;
        };
        let channels = buffer.num_channels();
        if channels == 0 {
            return;
        }
        let sides = [0, channels.min(2) - 1];

        stats.gain_reduction_db = stats.gain_reduction_db.max(reduction_db);
        for i in 0..buffer.len() {
            for (side, &ch) in sides.iter().enumerate() {
                let sample = buffer.samples[ch][i];
                stats.peak[side] = stats.peak[side].max(sample.abs());
                stats.sum_squares[side] += (sample as f64) * (sample as f64);
            }
            stats.frames += 1;

            if stats.frames == self.window_frames {
                self.publish(&stats, start_frame + i as u64 + 1);
                *stats = WindowStats {
                    gain_reduction_db: reduction_db,
                    ..WindowStats::default()
                };
            }
        }
    }

    fn publish(&self, stats: &WindowStats, end_frame: u64) {
        let n = self.published.load(Ordering::Relaxed);
        // Orders the previous count before the slot writes below
        fence(Ordering::Release);

        let slot = &self.slots[(n % SLOTS as u64) as usize];
        let frames = stats.frames as f64;
        for side in 0..2 {
            slot.peak[side].store(stats.peak[side].to_bits(), Ordering::Relaxed);
            let rms = (stats.sum_squares[side] / frames).sqrt() as f32;
            slot.rms[side].store(rms.to_bits(), Ordering::Relaxed);
        }
        slot.gain_reduction
            .store(stats.gain_reduction_db.to_bits(), Ordering::Relaxed);
        slot.end_frame.store(end_frame, Ordering::Relaxed);

        self.published.store(n + 1, Ordering::Release);
    }

    /// Newest completed window, if any (never blocks the writer)
    pub fn latest(&self) -> Option<WindowReading> {
        for _ in 0..SLOTS {
            let n = self.published.load(Ordering::Acquire);
            if n == 0 {
                return None;
            }
            let slot = &self.slots[((n - 1) % SLOTS as u64) as usize];
            let load = |a: &AtomicU32| f32::from_bits(a.load(Ordering::Relaxed));
            let reading = WindowReading {
                index: n,
                peak: [load(&slot.peak[0]), load(&slot.peak[1])],
                rms: [load(&slot.rms[0]), load(&slot.rms[1])],
                gain_reduction_db: load(&slot.gain_reduction),
                end_frame: slot.end_frame.load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            // The slot is rewritten only once the writer is SLOTS - 1 windows ahead
            if self.published.load(Ordering::Relaxed) < n + SLOTS as u64 - 1 {
                return Some(reading);
            }
        }
        None
    }

    /// Newest window not yet handed out by [`MeterTap::take_new`]
    pub fn take_new(&self) -> Option<WindowReading> {
        let reading = self.latest()?;
        let previous = self.delivered.fetch_max(reading.index, Ordering::AcqRel);
        (reading.index > previous).then_some(reading)
    }
}
