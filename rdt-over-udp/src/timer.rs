//! Round-trip-time estimation and retransmission timeouts.
//!
//! Reliable delivery requires that an unanswered segment is re-sent if no
//! reply arrives within a bounded time.  This module provides:
//! - [`TimerConfig`] — the tunable constants.
//! - [`RttEstimator`] — a low-pass RTT estimate with mean deviation, from
//!   which the retransmission timeout is derived.
//! - [`Backoff`] — the per-round-trip timeout that doubles on every
//!   consecutive expiry.
//!
//! The timeout is computed as in Jacobson's algorithm:
//!   `timeout = estimated_rtt + 4 × deviation_rtt`
//! A timed-out attempt yields no sample, so the estimator is only touched
//! when a round trip actually completes; until then [`Backoff`] doubles the
//! previous wait instead.

use std::time::Duration;

/// Adjustable timeout parameters.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Estimated RTT before any sample is available.
    pub initial_estimated_rtt: Duration,
    /// Deviation before any sample is available.
    pub initial_deviation_rtt: Duration,
    /// Gain applied to a new sample in the RTT average.
    pub alpha: f64,
    /// Gain applied to a new sample in the deviation average.
    pub beta: f64,
    /// Floor on the derived timeout; a near-zero RTT path would otherwise
    /// produce a zero wait.
    pub min_timeout: Duration,
    /// Silence the active closer waits for before releasing the transport.
    pub close_wait: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_estimated_rtt: Duration::from_millis(100),
            initial_deviation_rtt: Duration::from_millis(10),
            alpha: 0.125,
            beta: 0.25,
            min_timeout: Duration::from_millis(10),
            close_wait: Duration::from_millis(4000),
        }
    }
}

/// Exponentially weighted RTT estimate plus mean deviation, in milliseconds.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated_ms: f64,
    deviation_ms: f64,
    current_ms: f64,
    alpha: f64,
    beta: f64,
    min_timeout: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(&TimerConfig::default())
    }
}

impl RttEstimator {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            estimated_ms: millis(config.initial_estimated_rtt),
            deviation_ms: millis(config.initial_deviation_rtt),
            current_ms: 0.0,
            alpha: config.alpha,
            beta: config.beta,
            min_timeout: config.min_timeout,
        }
    }

    /// Fold one completed round trip into the estimate.
    ///
    /// The deviation is measured against the *updated* estimate:
    ///   estimated = (1 − α)·estimated + α·sample
    ///   deviation = (1 − β)·deviation + β·|sample − estimated|
    pub fn record_sample(&mut self, sample: Duration) {
        self.current_ms = millis(sample);
        self.estimated_ms = self.estimated_ms * (1.0 - self.alpha) + self.current_ms * self.alpha;
        let diff = (self.current_ms - self.estimated_ms).abs();
        self.deviation_ms = self.deviation_ms * (1.0 - self.beta) + diff * self.beta;
    }

    /// Retransmission timeout derived from the current estimate.
    pub fn timeout(&self) -> Duration {
        let ms = self.estimated_ms + 4.0 * self.deviation_ms;
        Duration::from_nanos((ms.max(0.0) * 1_000_000.0).round() as u64).max(self.min_timeout)
    }

    pub fn estimated_ms(&self) -> f64 {
        self.estimated_ms
    }

    pub fn deviation_ms(&self) -> f64 {
        self.deviation_ms
    }

    /// The most recent sample, or 0 before the first round trip.
    pub fn current_ms(&self) -> f64 {
        self.current_ms
    }
}

/// Per-round-trip timeout that doubles after each consecutive expiry.
///
/// A fresh `Backoff` is started from [`RttEstimator::timeout`] for every
/// round trip, so a success implicitly resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self { current: initial }
    }

    /// The wait for the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the wait after a timeout.
    pub fn back_off(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2);
        self.current
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_timeout_is_estimate_plus_four_deviations() {
        let est = RttEstimator::default();
        assert_eq!(est.estimated_ms(), 100.0);
        assert_eq!(est.deviation_ms(), 10.0);
        assert_eq!(est.timeout(), Duration::from_millis(140));
    }

    #[test]
    fn single_sample_updates_in_order() {
        let mut est = RttEstimator::default();
        est.record_sample(Duration::from_millis(20));
        // 100·0.875 + 20·0.125 = 90
        assert!((est.estimated_ms() - 90.0).abs() < 1e-9);
        // 10·0.75 + |20 − 90|·0.25 = 25
        assert!((est.deviation_ms() - 25.0).abs() < 1e-9);
        assert!((est.current_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn constant_samples_converge_monotonically() {
        let mut est = RttEstimator::default();
        let r = 40.0;
        let mut gap = (est.estimated_ms() - r).abs();
        for _ in 0..200 {
            est.record_sample(Duration::from_millis(40));
            let next_gap = (est.estimated_ms() - r).abs();
            assert!(next_gap < gap, "gap grew from {gap} to {next_gap}");
            gap = next_gap;
        }
        assert!(gap < 1e-6);
        assert!(est.deviation_ms() < 1e-6);
    }

    #[test]
    fn deviation_shrinks_every_step_when_sample_matches_estimate() {
        let mut est = RttEstimator::default();
        let mut dev = est.deviation_ms();
        for _ in 0..20 {
            est.record_sample(Duration::from_millis(100));
            assert!(est.deviation_ms() < dev);
            dev = est.deviation_ms();
        }
    }

    #[test]
    fn timeout_never_drops_below_floor() {
        let mut est = RttEstimator::default();
        for _ in 0..500 {
            est.record_sample(Duration::ZERO);
        }
        assert_eq!(est.timeout(), TimerConfig::default().min_timeout);
    }

    #[test]
    fn backoff_strictly_doubles() {
        let mut b = Backoff::new(Duration::from_millis(140));
        let mut prev = b.current();
        for _ in 0..8 {
            let next = b.back_off();
            assert_eq!(next, prev * 2);
            prev = next;
        }
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let mut b = Backoff::new(Duration::MAX / 2 + Duration::from_secs(1));
        assert_eq!(b.back_off(), Duration::MAX);
        assert_eq!(b.back_off(), Duration::MAX);
    }
}
