//! Smoothed per-second rate of a monotonically increasing counter.

use std::time::Instant;

/// Weight of the newest sample.
const EWMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Default)]
pub struct RateEstimator {
    baseline: Option<(u64, Instant)>,
    rate: Option<f64>,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current count. Polls where the count did not advance are
    /// ignored and keep the baseline; a count going backwards re-bases.
    pub fn observe(&mut self, count: u64, now: Instant) -> Option<f64> {
        let Some((base_count, base_at)) = self.baseline else {
            self.baseline = Some((count, now));
            return self.rate;
        };
        if count < base_count {
            self.baseline = Some((count, now));
            return self.rate;
        }
        if count == base_count {
            return self.rate;
        }
        let elapsed = now.saturating_duration_since(base_at).as_secs_f64();
        if elapsed <= 0.0 {
            return self.rate;
        }
        let sample = (count - base_count) as f64 / elapsed;
        self.rate = Some(match self.rate {
            Some(previous) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * previous,
            None => sample,
        });
        self.baseline = Some((count, now));
        self.rate
    }
}
