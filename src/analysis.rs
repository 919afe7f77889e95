//! Chirp analysis pipeline
//!
//! WAV bytes → mono samples → spectrogram → dominant-frequency curve →
//! latency crop → least-squares slope → accept/reject.

pub mod decision;
pub mod regression;
pub mod render;
pub mod spectrogram;
pub mod wav;

use decision::Outcome;
use regression::Regression;
use serde::{Deserialize, Serialize};
use spectrogram::Spectrogram;
use thiserror::Error;

/// FFT frame length in samples
pub const WINDOW_SIZE: usize = 1024;
/// Frames per window length
pub const OVERLAP: usize = 8;
/// Distance between frame starts
pub const HOP: usize = WINDOW_SIZE / OVERLAP;

/// Minimum goodness of fit (exclusive)
pub const R2_THRESHOLD: f64 = 0.95;
/// Maximum relative slope error (exclusive)
pub const SLOPE_TOLERANCE: f64 = 0.05;
/// Latency multiplier used when cropping the start and end of a recording
pub const LATENCY_SCALE: f64 = 1.4;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    #[error("not enough points to fit a slope (n = {n})")]
    InsufficientData { n: usize },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),
}

/// How row indices are turned into seconds.
///
/// `FrameCentre` is the default: stamping row `i` at `i / rows` of the total
/// duration compresses the axis by `WINDOW_SIZE / samples`, which on a two
/// second chirp biases the slope by more than [`SLOPE_TOLERANCE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TimeAxis {
    /// `duration * i / rows`
    Proportional,
    /// centre of the frame, `(i * HOP + WINDOW_SIZE / 2) / sample_rate`
    #[default]
    FrameCentre,
}

/// Which slope comparison the decision applies.
///
/// `RelativeError` is the default. `Inverted` rejects any slope that matches
/// the challenge and only exists for peers that still expect that rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SlopeRule {
    /// accept when the relative error is below the tolerance
    #[default]
    RelativeError,
    /// accept when `1 - relative error` is below the tolerance
    Inverted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub time_axis: TimeAxis,
    pub slope_rule: SlopeRule,
}

/// Rows kept for the fit, `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Crop {
    pub fraction: f64,
    pub start: usize,
    pub end: usize,
}

/// Drop the rows recorded before the chirp reached the microphone and the
/// same share (plus one row) from the end.
pub fn crop(rows: usize, latency_ms: i64, duration_secs: f64) -> Result<Crop, AnalysisError> {
    let fraction = latency_ms as f64 * LATENCY_SCALE / (duration_secs * 1000.0);
    if !(0.0..0.5).contains(&fraction) {
        return Err(AnalysisError::DegenerateInput(format!(
            "crop fraction {fraction} for latency {latency_ms} ms over {duration_secs} s"
        )));
    }

    let start = (rows as f64 * fraction).floor();
    let end = ((rows as f64 - 1.0) * (1.0 - fraction)).floor();
    if end <= start {
        return Err(AnalysisError::DegenerateInput(format!(
            "crop leaves no rows ({start}..{end} of {rows})"
        )));
    }

    Ok(Crop {
        fraction,
        start: start as usize,
        end: end as usize,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub sample_rate: u32,
    pub sample_count: usize,
    pub duration_secs: f64,
    pub rows: usize,
    pub columns: usize,
    pub latency_ms: i64,
    pub crop: Crop,
    pub regression: Regression,
    pub challenge_slope: f64,
    pub relative_slope_error: Option<f64>,
    pub outcome: Outcome,
}

/// A finished analysis; the grid is kept for rendering
#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: AnalysisReport,
    pub spectrogram: Spectrogram,
}

pub fn analyze(
    wav_bytes: &[u8],
    latency_ms: i64,
    challenge_slope: f64,
    settings: &AnalysisSettings,
) -> Result<Analysis, AnalysisError> {
    let audio = wav::decode(wav_bytes)?;
    let spectrogram = Spectrogram::compute(&audio.samples, audio.sample_rate);
    let duration_secs = spectrogram.duration_secs();

    let crop = crop(spectrogram.rows(), latency_ms, duration_secs)?;
    let curve = spectrogram.dominant_curve(settings.time_axis);
    let regression = regression::fit(&curve[crop.start..crop.end])?;
    let decision = decision::decide(challenge_slope, &regression, settings.slope_rule);

    tracing::debug!(
        sample_rate = audio.sample_rate,
        rows = spectrogram.rows(),
        crop_start = crop.start,
        crop_end = crop.end,
        slope = regression.slope,
        r2 = regression.r2,
        "chirp fit"
    );

    let report = AnalysisReport {
        sample_rate: audio.sample_rate,
        sample_count: audio.samples.len(),
        duration_secs,
        rows: spectrogram.rows(),
        columns: spectrogram.columns(),
        latency_ms,
        crop,
        regression,
        challenge_slope,
        relative_slope_error: decision.relative_slope_error,
        outcome: decision.outcome,
    };

    Ok(Analysis {
        report,
        spectrogram,
    })
}
