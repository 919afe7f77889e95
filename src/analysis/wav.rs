//! Fixed-layout WAV decoding
//!
//! Recordings are canonical 44-byte-header, 16-bit little-endian stereo PCM.
//! The header is not parsed beyond the sample rate at offset 24; each stereo
//! frame is folded to mono by averaging left and right.

use super::AnalysisError;

pub const HEADER_LEN: usize = 44;
const SAMPLE_RATE_OFFSET: usize = 24;
const FRAME_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f64>,
}

pub fn decode(bytes: &[u8]) -> Result<DecodedAudio, AnalysisError> {
    if bytes.len() < HEADER_LEN + FRAME_LEN {
        return Err(AnalysisError::MalformedAudio(format!(
            "{} bytes cannot hold a WAV header and one frame",
            bytes.len()
        )));
    }

    let rate = &bytes[SAMPLE_RATE_OFFSET..SAMPLE_RATE_OFFSET + 4];
    let sample_rate = u32::from_le_bytes([rate[0], rate[1], rate[2], rate[3]]);
    if sample_rate == 0 {
        return Err(AnalysisError::MalformedAudio(
            "sample rate is zero".to_string(),
        ));
    }

    let samples = bytes[HEADER_LEN..]
        .chunks_exact(FRAME_LEN)
        .map(|frame| {
            let left = i16::from_le_bytes([frame[0], frame[1]]) as f64;
            let right = i16::from_le_bytes([frame[2], frame[3]]) as f64;
            (left + right) / 2.0
        })
        .collect();

    Ok(DecodedAudio {
        sample_rate,
        samples,
    })
}
