//! Exponential position smoothing.
//!
//! `smoothed = previous + (raw - previous) * alpha`, per axis. The first
//! sample passes through unchanged. With `0 < alpha <= 1` every step moves
//! strictly toward the raw sample and never past it.

use fleetview_env::LatLng;
use serde::{Deserialize, Serialize};

/// Per-entity filter state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFilter {
    alpha: f64,
    state: Option<LatLng>,
}

impl PositionFilter {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: None }
    }

    /// Feed one raw sample and return the smoothed position.
    ///
    /// Non-finite samples are ignored and the current state is returned.
    pub fn apply(&mut self, raw: LatLng) -> LatLng {
        if !raw.is_finite() {
            return self.state.unwrap_or(raw);
        }
        let next = match self.state {
            None => raw,
            Some(prev) => LatLng::new(
                prev.lat + (raw.lat - prev.lat) * self.alpha,
                prev.lng + (raw.lng - prev.lng) * self.alpha,
            ),
        };
        self.state = Some(next);
        next
    }

    /// Current smoothed position, if any sample was seen.
    pub fn value(&self) -> Option<LatLng> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = PositionFilter::new(0.35);
        let out = filter.apply(LatLng::new(35.1, 126.9));
        assert_eq!(out, LatLng::new(35.1, 126.9));
    }

    #[test]
    fn test_single_step_weighting() {
        let mut filter = PositionFilter::new(0.35);
        filter.apply(LatLng::new(0.0, 0.0));
        let out = filter.apply(LatLng::new(1.0, -2.0));
        assert_relative_eq!(out.lat, 0.35, epsilon = 1e-12);
        assert_relative_eq!(out.lng, -0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_converges_without_overshoot() {
        let mut filter = PositionFilter::new(0.35);
        filter.apply(LatLng::new(35.0, 126.0));
        let target = LatLng::new(35.01, 126.02);

        let mut last_gap = f64::MAX;
        let mut steps = 0;
        loop {
            let out = filter.apply(target);
            steps += 1;
            assert!(out.lat <= target.lat && out.lng <= target.lng, "overshoot at step {}", steps);
            let gap = (target.lat - out.lat).abs().max((target.lng - out.lng).abs());
            assert!(gap <= last_gap);
            last_gap = gap;
            if gap < 1e-7 {
                break;
            }
            assert!(steps < 60, "did not converge");
        }
    }

    #[test]
    fn test_non_finite_sample_ignored() {
        let mut filter = PositionFilter::new(0.35);
        filter.apply(LatLng::new(35.0, 126.0));
        let out = filter.apply(LatLng::new(f64::NAN, 126.5));
        assert_eq!(out, LatLng::new(35.0, 126.0));
    }

    #[test]
    fn test_reset() {
        let mut filter = PositionFilter::new(0.35);
        filter.apply(LatLng::new(35.0, 126.0));
        filter.reset();
        assert_eq!(filter.value(), None);
    }
}
