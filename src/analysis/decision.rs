//! Accept/reject rule for a measured chirp slope

use super::regression::Regression;
use super::{R2_THRESHOLD, SLOPE_TOLERANCE, SlopeRule};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    /// `None` when the challenge slope is unusable
    pub relative_slope_error: Option<f64>,
}

/// Compare the fitted slope against the challenge slope.
///
/// A zero or non-finite challenge always fails.
pub fn decide(challenge_slope: f64, fit: &Regression, rule: SlopeRule) -> Decision {
    if challenge_slope == 0.0 || !challenge_slope.is_finite() {
        return Decision {
            outcome: Outcome::Failure,
            relative_slope_error: None,
        };
    }

    let error = (challenge_slope - fit.slope).abs() / challenge_slope.abs();
    let slope_ok = match rule {
        SlopeRule::RelativeError => error < SLOPE_TOLERANCE,
        SlopeRule::Inverted => (1.0 - error) < SLOPE_TOLERANCE,
    };

    let outcome = if fit.r2 > R2_THRESHOLD && slope_ok {
        Outcome::Success
    } else {
        Outcome::Failure
    };

    Decision {
        outcome,
        relative_slope_error: Some(error),
    }
}
