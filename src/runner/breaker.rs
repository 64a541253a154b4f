use crate::runner::aggregate::RunCounters;

/// Default failure-rate threshold, in percent.
pub const DEFAULT_MAX_FAILURE_RATE: f64 = 50.0;

/// Checks that must have run before the breaker may trip.
pub const DEFAULT_MINIMUM_SAMPLE: usize = 3;

/// Statistical early exit: stop the run once enough checks have failed that
/// the remaining results would be noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreaker {
    pub max_failure_rate_percent: f64,
    pub minimum_sample: usize,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            max_failure_rate_percent: DEFAULT_MAX_FAILURE_RATE,
            minimum_sample: DEFAULT_MINIMUM_SAMPLE,
        }
    }
}

impl CircuitBreaker {
    pub fn with_max_failure_rate(mut self, percent: f64) -> Self {
        self.max_failure_rate_percent = percent;
        self
    }

    /// True once the sample is large enough and the failure rate is strictly
    /// above the threshold.
    pub fn should_trip(&self, counters: &RunCounters) -> bool {
        counters.total >= self.minimum_sample
            && counters.failure_rate() > self.max_failure_rate_percent
    }
}
