//! Ordinary least squares over `(x, y)` points

use super::AnalysisError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Regression {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub n: usize,
}

/// Fit `y = slope * x + intercept`.
///
/// Needs at least two points and some spread in `x`. A perfectly flat `y`
/// is an exact fit and reports `r2 = 1`.
pub fn fit(points: &[(f64, f64)]) -> Result<Regression, AnalysisError> {
    let n = points.len();
    if n < 2 {
        return Err(AnalysisError::InsufficientData { n });
    }
    let first_x = points[0].0;
    if points.iter().all(|&(x, _)| x == first_x) {
        return Err(AnalysisError::DegenerateInput(
            "all time values are identical".to_string(),
        ));
    }

    let count = n as f64;
    let x_mean = points.iter().map(|p| p.0).sum::<f64>() / count;
    let y_mean = points.iter().map(|p| p.1).sum::<f64>() / count;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut ss_tot = 0.0;
    for &(x, y) in points {
        let dx = x - x_mean;
        let dy = y - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        ss_tot += dy * dy;
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = points
        .iter()
        .map(|&(x, y)| {
            let residual = y - (slope * x + intercept);
            residual * residual
        })
        .sum();
    let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    Ok(Regression {
        slope,
        intercept,
        r2,
        n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_line() {
        let points: Vec<_> = (0..50)
            .map(|i| {
                let x = i as f64 * 0.016;
                (x, 1000.0 * x + 1064.0)
            })
            .collect();
        let fit = fit(&points).unwrap();
        assert!((fit.slope - 1000.0).abs() < 1e-6);
        assert!((fit.intercept - 1064.0).abs() < 1e-6);
        assert!((fit.r2 - 1.0).abs() < 1e-12);
        assert_eq!(fit.n, 50);
    }

    #[test]
    fn test_noisy_line_has_lower_r2() {
        let points = [(0.0, 0.0), (1.0, 3.0), (2.0, 1.0), (3.0, 4.0)];
        let fit = fit(&points).unwrap();
        assert!((fit.slope - 1.0).abs() < 1e-12);
        assert!(fit.r2 > 0.0 && fit.r2 < 1.0);
    }

    #[test]
    fn test_flat_line_is_exact() {
        let fit = fit(&[(0.0, 5.0), (1.0, 5.0), (2.0, 5.0)]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r2, 1.0);
    }

    #[test]
    fn test_too_few_points() {
        assert_eq!(fit(&[]), Err(AnalysisError::InsufficientData { n: 0 }));
        assert_eq!(
            fit(&[(1.0, 2.0)]),
            Err(AnalysisError::InsufficientData { n: 1 })
        );
    }

    #[test]
    fn test_constant_x_is_degenerate() {
        assert!(matches!(
            fit(&[(0.1, 1.0), (0.1, 2.0), (0.1, 3.0)]),
            Err(AnalysisError::DegenerateInput(_))
        ));
    }
}
