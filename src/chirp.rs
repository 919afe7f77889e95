//! Linear chirp synthesis for verifier-side challenges and test fixtures

use hound::{WavSpec, WavWriter};
use std::f64::consts::PI;
use std::io::Cursor;
use std::path::Path;

/// A linear frequency sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chirp {
    pub start_hz: f64,
    pub end_hz: f64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    /// Peak amplitude as a fraction of full scale
    pub amplitude: f64,
}

impl Chirp {
    /// Sweep rate in Hz/s, the value published as the challenge slope
    pub fn slope(&self) -> f64 {
        (self.end_hz - self.start_hz) / self.duration_secs
    }

    pub fn synthesize(&self) -> Vec<i16> {
        let count = (self.duration_secs * self.sample_rate as f64).round() as usize;
        let k = self.slope();
        let peak = self.amplitude.clamp(0.0, 1.0) * i16::MAX as f64;

        (0..count)
            .map(|n| {
                let t = n as f64 / self.sample_rate as f64;
                let phase = 2.0 * PI * (self.start_hz * t + 0.5 * k * t * t);
                (peak * phase.sin()).round() as i16
            })
            .collect()
    }
}

fn stereo_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode mono samples as a 16-bit stereo WAV in memory
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), stereo_spec(sample_rate))?;
        for &s in samples {
            writer.write_sample(s)?;
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

/// Write mono samples as a 16-bit stereo WAV file
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), hound::Error> {
    let bytes = encode_wav(samples, sample_rate)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::wav;

    fn chirp() -> Chirp {
        Chirp {
            start_hz: 1_000.0,
            end_hz: 3_000.0,
            duration_secs: 2.0,
            sample_rate: 8_000,
            amplitude: 0.8,
        }
    }

    #[test]
    fn test_slope() {
        assert_eq!(chirp().slope(), 1_000.0);
    }

    #[test]
    fn test_synthesize_length_and_peak() {
        let samples = chirp().synthesize();
        assert_eq!(samples.len(), 16_000);
        assert_eq!(samples[0], 0);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= (0.8 * i16::MAX as f64).round() as u16);
        assert!(peak > 20_000);
    }

    #[test]
    fn test_encoded_wav_has_canonical_header() {
        let bytes = encode_wav(&[1, -1, 7], 8_000).unwrap();
        assert_eq!(bytes.len(), wav::HEADER_LEN + 3 * 4);
        assert_eq!(&bytes[..4], b"RIFF");

        let audio = wav::decode(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 8_000);
        assert_eq!(audio.samples, vec![1.0, -1.0, 7.0]);
    }

    #[test]
    fn test_write_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chirp.wav");
        write_wav(&path, &chirp().synthesize(), 8_000).unwrap();

        let audio = wav::decode(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(audio.samples.len(), 16_000);
    }
}
