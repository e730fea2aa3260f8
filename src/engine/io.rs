//! WAV file I/O
//!
//! The file collaborator used by the CLI: reads a WAV into a planar
//! [`AudioBuffer`] at its own sample rate and writes one back out. Only mono
//! and stereo files are accepted.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::error::{EngineError, Result};

/// Bit depths accepted by [`write_wav`]
pub const SUPPORTED_BIT_DEPTHS: [u16; 3] = [16, 24, 32];

fn file_error(path: &Path, source: hound::Error) -> EngineError {
    EngineError::AudioFile {
        path: path.display().to_string(),
        source,
    }
}

/// Read a WAV file into a planar buffer
///
/// Integer formats are scaled to [-1, 1). The buffer keeps the file's
/// sample rate.
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path).map_err(|e| file_error(path, e))?;
    let spec = reader.spec();
    let layout = ChannelLayout::from_count(spec.channels as usize)
        .ok_or_else(|| file_error(path, hound::Error::Unsupported))?;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| file_error(path, e))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| file_error(path, e))?
        }
    };

    AudioBuffer::from_interleaved(&samples, layout, spec.sample_rate)
        .ok_or_else(|| file_error(path, hound::Error::FormatError("partial frame at end of file")))
}

/// Write a buffer as WAV
///
/// # Arguments
/// * `buffer` - Planar audio to write
/// * `path` - Destination file
/// * `bit_depth` - 16 or 24 (integer PCM) or 32 (float)
pub fn write_wav(buffer: &AudioBuffer, path: &Path, bit_depth: u16) -> Result<()> {
    if !SUPPORTED_BIT_DEPTHS.contains(&bit_depth) {
        return Err(file_error(path, hound::Error::Unsupported));
    }
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: bit_depth,
        sample_format: if bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    let mut writer = WavWriter::create(path, spec).map_err(|e| file_error(path, e))?;
    let full_scale = ((1_i64 << (bit_depth - 1)) - 1) as f32;
    for sample in buffer.to_interleaved() {
        let written = if bit_depth == 32 {
            writer.write_sample(sample)
        } else {
            let scaled = (sample * full_scale).round().clamp(-full_scale - 1.0, full_scale);
            writer.write_sample(scaled as i32)
        };
        written.map_err(|e| file_error(path, e))?;
    }
    writer.finalize().map_err(|e| file_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_stereo_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let tone = AudioBuffer::sine(440.0, 0.5, 4800, ChannelLayout::Stereo, 44100);

        write_wav(&tone, &path, 32).unwrap();
        let read = read_wav(&path).unwrap();
        assert_eq!(read.sample_rate, 44100);
        assert_eq!(read, tone);
    }

    #[test]
    fn test_round_trip_16bit_within_quantization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone16.wav");
        let tone = AudioBuffer::sine(440.0, 0.5, 4800, ChannelLayout::Mono, 48000);

        write_wav(&tone, &path, 16).unwrap();
        let read = read_wav(&path).unwrap();
        for (a, b) in tone.channel(0).iter().zip(read.channel(0)) {
            assert!((a - b).abs() < 1.0 / 16384.0);
        }
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let dir = tempfile::tempdir().unwrap();
        let tone = AudioBuffer::new(10, ChannelLayout::Mono);
        let err = write_wav(&tone, &dir.path().join("x.wav"), 8).unwrap_err();
        assert_eq!(err.error_code(), "AUDIO_FILE_ERROR");
    }

    #[test]
    fn test_missing_file() {
        let err = read_wav(Path::new("/nonexistent/input.wav")).unwrap_err();
        assert_eq!(err.error_code(), "AUDIO_FILE_ERROR");
    }
}
