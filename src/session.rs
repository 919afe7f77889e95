//! Per-attempt timing and results

use crate::analysis::decision::Outcome;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verdict {
    #[default]
    Pending,
    Success,
    Failure,
}

impl From<Outcome> for Verdict {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Verdict::Success,
            Outcome::Failure => Verdict::Failure,
        }
    }
}

/// One authentication attempt, reset after every verdict.
///
/// The current flag is tracked by the state machine, and latency is derived
/// from the two stamps by [`Session::latency_ms`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Milliseconds since the epoch when recording started
    pub t1: Option<i64>,
    /// Milliseconds since the epoch when playback started
    pub t2: Option<i64>,
    pub challenge_slope: f64,
    pub recording_path: Option<PathBuf>,
    pub measured_slope: Option<f64>,
    pub r2: Option<f64>,
    pub verdict: Verdict,
}

impl Session {
    /// `t2 - t1`, or `None` until both are known
    pub fn latency_ms(&self) -> Option<i64> {
        match (self.t1, self.t2) {
            (Some(t1), Some(t2)) => Some(t2 - t1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_needs_both_stamps() {
        let mut session = Session::default();
        assert_eq!(session.latency_ms(), None);
        session.t2 = Some(1_500);
        assert_eq!(session.latency_ms(), None);
        session.t1 = Some(1_000);
        assert_eq!(session.latency_ms(), Some(500));
    }

    #[test]
    fn test_negative_latency_is_reported() {
        let session = Session {
            t1: Some(2_000),
            t2: Some(1_000),
            ..Default::default()
        };
        assert_eq!(session.latency_ms(), Some(-1_000));
    }
}
