//! Audio Buffer Management
//!
//! The planar buffer shared by the render path and the processing units, and
//! the dBFS conversions used wherever a level crosses the public API.

/// Amplitudes below this read as silence when converted to dB
pub const AMPLITUDE_EPSILON: f32 = 1e-6;

/// Level reported for silence (20 * log10(AMPLITUDE_EPSILON))
pub const FLOOR_DB: f32 = -120.0;

/// dB to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Linear amplitude to dBFS, floored at [`FLOOR_DB`]
///
/// NaN reads as silence.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    let amplitude = if linear.is_nan() { 0.0 } else { linear.abs() };
    20.0 * amplitude.max(AMPLITUDE_EPSILON).log10()
}

/// Channel configurations the engine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Layout for a channel count; `None` beyond stereo
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// Planar 32-bit float audio
///
/// One `Vec<f32>` per channel, all of equal length. Render-path buffers are
/// created once with [`AudioBuffer::with_capacity`] and resized per block with
/// [`AudioBuffer::set_frames`], which stays within that capacity.
///
/// ```
/// use gainstage::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(480, ChannelLayout::Stereo);
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.len(), 480);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Channel-major sample data
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Zeroed buffer of `frames` frames at the default sample rate
    pub fn new(frames: usize, layout: ChannelLayout) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; layout.num_channels()],
            sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
        }
    }

    /// Zero-length buffer that can grow to `capacity` frames without allocating
    pub fn with_capacity(layout: ChannelLayout, capacity: usize, sample_rate: u32) -> Self {
        Self {
            samples: (0..layout.num_channels())
                .map(|_| Vec::with_capacity(capacity))
                .collect(),
            sample_rate,
        }
    }

    /// Wrap planar channel data
    ///
    /// `None` if the channels differ in length or there are more than two.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Option<Self> {
        ChannelLayout::from_count(samples.len())?;
        let len = samples.first().map(Vec::len).unwrap_or(0);
        if samples.iter().any(|ch| ch.len() != len) {
            return None;
        }
        Some(Self {
            samples,
            sample_rate,
        })
    }

    /// De-interleave frames; `None` if the data ends mid-frame
    pub fn from_interleaved(data: &[f32], layout: ChannelLayout, sample_rate: u32) -> Option<Self> {
        let width = layout.num_channels();
        if data.len() % width != 0 {
            return None;
        }
        let mut samples: Vec<Vec<f32>> = (0..width)
            .map(|_| Vec::with_capacity(data.len() / width))
            .collect();
        for frame in data.chunks_exact(width) {
            for (channel, &sample) in samples.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Some(Self {
            samples,
            sample_rate,
        })
    }

    /// Sine tone, identical on every channel
    pub fn sine(
        frequency: f32,
        amplitude: f32,
        frames: usize,
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Self {
        let step = std::f32::consts::TAU * frequency / sample_rate as f32;
        let tone: Vec<f32> = (0..frames).map(|i| amplitude * (step * i as f32).sin()).collect();
        Self {
            samples: vec![tone; layout.num_channels()],
            sample_rate,
        }
    }

    /// Frames in channel order, L R L R ...
    pub fn to_interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut out = Vec::with_capacity(frames * self.num_channels());
        for i in 0..frames {
            out.extend(self.samples.iter().map(|channel| channel[i]));
        }
        out
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` for channel counts the engine does not accept
    pub fn channel_layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_count(self.num_channels())
    }

    /// # Panics
    /// If `index` is not a channel of this buffer
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// # Panics
    /// If `index` is not a channel of this buffer
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    // ========================================================================
    // Render-path helpers (no allocation within capacity)
    // ========================================================================

    /// Resize every channel to `frames`, zero-filling new samples
    #[inline]
    pub fn set_frames(&mut self, frames: usize) {
        for channel in &mut self.samples {
            channel.resize(frames, 0.0);
        }
    }

    /// Zero every sample
    #[inline]
    pub fn silence(&mut self) {
        for channel in &mut self.samples {
            channel.fill(0.0);
        }
    }

    /// Copy `frames` frames of `src` starting at `offset` into this buffer
    ///
    /// A source with fewer channels is up-mixed by repeating its last channel.
    /// Frames past the end of `src` read as silence.
    pub fn copy_range_from(&mut self, src: &AudioBuffer, offset: usize, frames: usize) {
        self.set_frames(frames);
        let src_channels = src.num_channels();
        if src_channels == 0 {
            self.silence();
            return;
        }
        for (ch, dst) in self.samples.iter_mut().enumerate() {
            let source = &src.samples[ch.min(src_channels - 1)];
            let start = offset.min(source.len());
            let end = (offset + frames).min(source.len()).max(start);
            let available = end - start;
            dst[..available].copy_from_slice(&source[start..end]);
            dst[available..].fill(0.0);
        }
    }

    /// Copy all frames of `src` into this buffer (same channel mapping as
    /// [`AudioBuffer::copy_range_from`])
    #[inline]
    pub fn copy_from(&mut self, src: &AudioBuffer) {
        self.copy_range_from(src, 0, src.len());
    }

    /// Write this buffer into `dst` starting at frame `offset`
    ///
    /// Extra destination channels receive the last source channel.
    pub fn write_range_to(&self, dst: &mut AudioBuffer, offset: usize) {
        let channels = self.num_channels();
        if channels == 0 {
            return;
        }
        let frames = self.len();
        for (ch, out) in dst.samples.iter_mut().enumerate() {
            let source = &self.samples[ch.min(channels - 1)];
            let end = (offset + frames).min(out.len());
            if end > offset {
                out[offset..end].copy_from_slice(&source[..end - offset]);
            }
        }
    }

    /// Multiply every sample by a constant gain
    #[inline]
    pub fn scale(&mut self, gain: f32) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample *= gain;
            }
        }
    }

    /// Accumulate `src * gain` into this buffer, frame for frame
    #[inline]
    pub fn add_scaled(&mut self, src: &AudioBuffer, gain: f32) {
        for (dst, source) in self.samples.iter_mut().zip(&src.samples) {
            for (d, s) in dst.iter_mut().zip(source) {
                *d += *s * gain;
            }
        }
    }

    /// Peak absolute sample value across all channels (linear)
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .fold(0.0_f32, |acc, &s| acc.max(s.abs()))
    }

    /// RMS over all channels (linear)
    pub fn rms(&self) -> f32 {
        let total = self.num_channels() * self.len();
        if total == 0 {
            return 0.0;
        }
        let sum_squares: f64 = self
            .samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum_squares / total as f64).sqrt() as f32
    }
}

// ============================================================================
// Tests
// ============================================================================
