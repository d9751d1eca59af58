use std::time::Duration;

/// Smoothed round-trip time tracking.
///
/// Feeds samples into an exponential weighted moving average. The retransmission
/// interval is derived from the smoothed value alone.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed round-trip time
    rtt: Duration,
    /// Smoothing factor for RTT calculations (typically 0.1)
    rtt_alpha: f32,
    /// Whether a real sample replaced the initial guess yet
    sampled: bool,
}

impl RttEstimator {
    /// Initial estimate used before the first sample.
    pub const INITIAL_RTT: Duration = Duration::from_millis(50);

    /// Creates an estimator with the given smoothing factor.
    pub fn new(rtt_alpha: f32) -> Self {
        Self { rtt: Self::INITIAL_RTT, rtt_alpha, sampled: false }
    }

    /// Updates RTT measurement with a new sample.
    pub fn update(&mut self, sample: Duration) {
        if !self.sampled {
            // First real sample replaces the guess outright
            self.rtt = sample;
            self.sampled = true;
            return;
        }

        let sample_ms = sample.as_secs_f32() * 1000.0;
        let rtt_ms = self.rtt.as_secs_f32() * 1000.0;

        // RTT = (1 - α) * RTT + α * sample
        let new_rtt_ms = (1.0 - self.rtt_alpha) * rtt_ms + self.rtt_alpha * sample_ms;
        self.rtt = Duration::from_secs_f32(new_rtt_ms.max(0.0) / 1000.0);
    }

    /// Returns the current smoothed RTT.
    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    /// Returns true once at least one sample was recorded.
    pub fn has_samples(&self) -> bool {
        self.sampled
    }

    /// Retransmission interval: `base + rtt * factor`, capped at `max`.
    ///
    /// A product too large for a [Duration] saturates at `max`.
    pub fn resend_delay(&self, base: Duration, factor: f32, max: Duration) -> Duration {
        let scaled = Duration::try_from_secs_f32(self.rtt.as_secs_f32() * factor.max(0.0))
            .unwrap_or(max);
        base.saturating_add(scaled).min(max)
    }
}
