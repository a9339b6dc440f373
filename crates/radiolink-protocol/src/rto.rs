//! Retransmission timeout estimation for selective-ack rounds.
//!
//! Smoothed RTT and RTT variance are exponentially weighted moving averages; the
//! timeout is `srtt + 4 * rttvar`, clamped to the configured bounds. Each expiry doubles
//! the timeout until the next valid sample.

use std::time::Duration;

use radiolink_core::Config;

/// Tracks round-trip times between an ack request and its ack.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    /// Smoothed RTT; `None` until the first sample
    srtt: Option<Duration>,
    rtt_variance: Duration,
    rto: Duration,
    rtt_alpha: f32,
    rtt_beta: f32,
    min_rto: Duration,
    max_rto: Duration,
}

impl RtoEstimator {
    /// Creates an estimator starting at `initial` and clamped to `min..=max`.
    pub fn new(initial: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt: None,
            rtt_variance: Duration::ZERO,
            rto: initial.clamp(min_rto, max_rto),
            rtt_alpha: 0.125,
            rtt_beta: 0.25,
            min_rto,
            max_rto,
        }
    }

    /// Creates an estimator from the stack configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut estimator = Self::new(config.initial_rto, config.min_rto, config.max_rto);
        estimator.rtt_alpha = config.rtt_smoothing_factor;
        estimator.rtt_beta = config.rtt_variance_factor;
        estimator
    }

    /// Feeds a new RTT sample.
    pub fn update(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f32() * 1000.0;
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rtt_variance = sample / 2;
            }
            Some(srtt) => {
                let srtt_ms = srtt.as_secs_f32() * 1000.0;
                let var_ms = self.rtt_variance.as_secs_f32() * 1000.0;

                // Var = (1 - β) * Var + β * |SRTT - sample|
                let diff = (srtt_ms - sample_ms).abs();
                let new_var_ms = (1.0 - self.rtt_beta) * var_ms + self.rtt_beta * diff;
                // SRTT = (1 - α) * SRTT + α * sample
                let new_srtt_ms = (1.0 - self.rtt_alpha) * srtt_ms + self.rtt_alpha * sample_ms;

                self.rtt_variance = Duration::from_micros((new_var_ms * 1000.0) as u64);
                self.srtt = Some(Duration::from_micros((new_srtt_ms * 1000.0) as u64));
            }
        }

        let srtt = self.srtt.unwrap_or(sample);
        self.rto = (srtt + self.rtt_variance * 4).clamp(self.min_rto, self.max_rto);
    }

    /// Doubles the timeout after an expiry.
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed RTT, once measured.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RtoEstimator {
        RtoEstimator::new(
            Duration::from_millis(1028),
            Duration::from_millis(256),
            Duration::from_secs(8),
        )
    }

    #[test]
    fn test_initial_rto() {
        let rto = estimator();
        assert_eq!(rto.rto(), Duration::from_millis(1028));
        assert_eq!(rto.srtt(), None);
    }

    #[test]
    fn test_first_sample() {
        let mut rto = estimator();
        rto.update(Duration::from_millis(100));
        assert_eq!(rto.srtt(), Some(Duration::from_millis(100)));
        // 100 + 4 * 50
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn test_rto_respects_minimum() {
        let mut rto = estimator();
        for _ in 0..20 {
            rto.update(Duration::from_millis(10));
        }
        assert_eq!(rto.rto(), Duration::from_millis(256));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut rto = estimator();
        rto.backoff();
        assert_eq!(rto.rto(), Duration::from_millis(2056));
        for _ in 0..5 {
            rto.backoff();
        }
        assert_eq!(rto.rto(), Duration::from_secs(8));
    }

    #[test]
    fn test_smoothing_moves_toward_samples() {
        let mut rto = estimator();
        rto.update(Duration::from_millis(100));
        rto.update(Duration::from_millis(500));
        let srtt = rto.srtt().unwrap();
        assert!(srtt > Duration::from_millis(100) && srtt < Duration::from_millis(500));
    }
}
