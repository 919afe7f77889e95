//! Spectrogram image for debugging recordings
//!
//! One pixel per cell: x is time (row), y is frequency with the highest bin at
//! the top. Loud cells are red, quiet cells blue.

use super::spectrogram::Spectrogram;
use std::path::Path;
use thiserror::Error;
use tiny_skia::{Pixmap, PremultipliedColorU8};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("spectrogram is empty ({rows}x{columns})")]
    Empty { rows: usize, columns: usize },

    #[error("failed to encode PNG: {0}")]
    Encode(String),
}

/// Map a normalized value to the red/blue gradient
pub fn gradient(value: f64) -> (u8, u8, u8) {
    let v = value.clamp(0.0, 1.0);
    ((255.0 * v) as u8, 0, (255.0 * (1.0 - v)) as u8)
}

pub fn to_pixmap(grid: &Spectrogram) -> Result<Pixmap, RenderError> {
    let empty = || RenderError::Empty {
        rows: grid.rows(),
        columns: grid.columns(),
    };
    let width = u32::try_from(grid.rows()).map_err(|_| empty())?;
    let height = u32::try_from(grid.columns()).map_err(|_| empty())?;
    let mut pixmap = Pixmap::new(width, height).ok_or_else(empty)?;

    let stride = grid.rows();
    let pixels = pixmap.pixels_mut();
    for x in 0..grid.rows() {
        for (y, &value) in grid.row(x).iter().enumerate() {
            let (r, g, b) = gradient(value);
            if let Some(color) = PremultipliedColorU8::from_rgba(r, g, b, 255) {
                pixels[y * stride + x] = color;
            }
        }
    }

    Ok(pixmap)
}

/// Render and write the spectrogram as a PNG file
pub fn save_png(grid: &Spectrogram, path: &Path) -> Result<(), RenderError> {
    let pixmap = to_pixmap(grid)?;
    pixmap
        .save_png(path)
        .map_err(|e| RenderError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone_grid() -> Spectrogram {
        let samples: Vec<f64> = (0..3_000)
            .map(|n| 8_000.0 * (2.0 * PI * 1_000.0 * n as f64 / 8_000.0).sin())
            .collect();
        Spectrogram::compute(&samples, 8_000)
    }

    #[test]
    fn test_gradient_endpoints() {
        assert_eq!(gradient(0.0), (0, 0, 255));
        assert_eq!(gradient(1.0), (255, 0, 0));
        assert_eq!(gradient(0.5), (127, 0, 127));
    }

    #[test]
    fn test_pixmap_layout() {
        let grid = tone_grid();
        let pixmap = to_pixmap(&grid).unwrap();
        assert_eq!(pixmap.width() as usize, grid.rows());
        assert_eq!(pixmap.height(), 513);

        // the 1 kHz tone sits in column 384 of every row
        for x in 0..grid.rows() {
            let hot = pixmap.pixel(x as u32, 384).unwrap();
            assert!(hot.red() >= 254 && hot.blue() == 0, "row {x}: {hot:?}");
        }
        let cold = pixmap.pixel(0, 0).unwrap();
        assert_eq!((cold.red(), cold.blue()), (0, 255));

        // the global maximum renders as full red
        let peak = (0..grid.rows())
            .find(|&r| grid.row(r)[384] == 1.0)
            .unwrap();
        let hot = pixmap.pixel(peak as u32, 384).unwrap();
        assert_eq!((hot.red(), hot.blue()), (255, 0));
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let grid = Spectrogram::compute(&[0.0; 10], 8_000);
        assert!(matches!(to_pixmap(&grid), Err(RenderError::Empty { .. })));
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectrogram.png");
        save_png(&tone_grid(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
