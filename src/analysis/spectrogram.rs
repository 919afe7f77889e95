//! Short-time FFT spectrogram and dominant-frequency extraction
//!
//! Frames of `WINDOW_SIZE` samples are taken every `HOP` samples (rectangular
//! window, no padding). Each row holds the power of the `WINDOW_SIZE / 2 + 1`
//! non-negative bins with the frequency axis reversed, so column 0 is the
//! Nyquist bin. Cells are normalized against one global min/max.

use super::{HOP, TimeAxis, WINDOW_SIZE};
use rustfft::{FftPlanner, num_complex::Complex};

/// Power values below this are clamped before normalization
const POWER_FLOOR: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Spectrogram {
    rows: usize,
    columns: usize,
    cells: Vec<f64>,
    sample_rate: u32,
    sample_count: usize,
}

impl Spectrogram {
    /// Build the normalized grid for a mono signal.
    ///
    /// Signals shorter than one window produce an empty grid.
    pub fn compute(samples: &[f64], sample_rate: u32) -> Self {
        let rows = samples.len().saturating_sub(WINDOW_SIZE) / HOP;
        let columns = WINDOW_SIZE / 2 + 1;
        let mut cells = vec![0.0; rows * columns];

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(WINDOW_SIZE);
        let mut buffer = vec![Complex::new(0.0, 0.0); WINDOW_SIZE];
        let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for (i, row) in cells.chunks_exact_mut(columns).enumerate() {
            let frame = &samples[i * HOP..i * HOP + WINDOW_SIZE];
            for (slot, &sample) in buffer.iter_mut().zip(frame) {
                *slot = Complex::new(sample, 0.0);
            }
            fft.process_with_scratch(&mut buffer, &mut scratch);

            for (bin, value) in buffer[..columns].iter().enumerate() {
                let power = value.norm_sqr().max(POWER_FLOOR);
                row[columns - 1 - bin] = power;
                min = min.min(power);
                max = max.max(power);
            }
        }

        let range = max - min;
        for cell in &mut cells {
            *cell = if range > 0.0 { (*cell - min) / range } else { 0.0 };
        }

        tracing::debug!(rows, columns, min_power = min, max_power = max, "spectrogram");

        Self {
            rows,
            columns,
            cells,
            sample_rate,
            sample_count: samples.len(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count as f64 / self.sample_rate as f64
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.cells[index * self.columns..(index + 1) * self.columns]
    }

    /// Strongest column of every row, first one wins on ties
    pub fn peak_columns(&self) -> Vec<usize> {
        (0..self.rows)
            .map(|r| {
                let mut best = 0;
                for (c, &value) in self.row(r).iter().enumerate() {
                    if value > self.row(r)[best] {
                        best = c;
                    }
                }
                best
            })
            .collect()
    }

    /// Dominant frequency in Hz for every row
    pub fn dominant_frequencies(&self) -> Vec<f64> {
        let nyquist = self.sample_rate as f64 / 2.0;
        self.peak_columns()
            .into_iter()
            .map(|c| nyquist * (1.0 - c as f64 / self.columns as f64))
            .collect()
    }

    /// Time stamp in seconds for every row
    pub fn timestamps(&self, axis: TimeAxis) -> Vec<f64> {
        match axis {
            TimeAxis::Proportional => {
                let total = self.duration_secs();
                (0..self.rows)
                    .map(|i| total * (i as f64 / self.rows as f64))
                    .collect()
            }
            TimeAxis::FrameCentre => (0..self.rows)
                .map(|i| (i * HOP + WINDOW_SIZE / 2) as f64 / self.sample_rate as f64)
                .collect(),
        }
    }

    /// `(seconds, hz)` pairs, one per row
    pub fn dominant_curve(&self, axis: TimeAxis) -> Vec<(f64, f64)> {
        self.timestamps(axis)
            .into_iter()
            .zip(self.dominant_frequencies())
            .collect()
    }
}
