//! Poll cadence for the intercept worker

use std::time::Duration;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Decides how long the worker sleeps between cycles.
///
/// Short delays while flows are paused keep operator latency low; the idle
/// delay bounds how stale the cached toggle can get. Consecutive transport
/// failures back off exponentially, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    busy: Duration,
    idle: Duration,
    max_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(1))
    }
}

impl PollPolicy {
    pub fn new(busy: Duration, idle: Duration) -> Self {
        let busy = busy.max(MIN_INTERVAL);
        let idle = idle.max(busy);
        Self {
            busy,
            idle,
            max_backoff: idle.max(Duration::from_secs(5)),
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.idle);
        self
    }

    pub fn busy_interval(&self) -> Duration {
        self.busy
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle
    }

    /// Delay before the next cycle given the number of paused flows and the
    /// number of consecutive failed cycles.
    pub fn next_delay(&self, pending: usize, failures: u32) -> Duration {
        let base = if pending > 0 { self.busy } else { self.idle };
        if failures == 0 {
            return base;
        }
        let factor = 2u32.saturating_pow(failures.min(6));
        base.saturating_mul(factor).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_busy_is_faster_than_idle() {
        let policy = PollPolicy::default();
        assert_eq!(policy.next_delay(3, 0), Duration::from_millis(200));
        assert_eq!(policy.next_delay(0, 0), Duration::from_secs(1));
    }

    #[test]
    fn test_failures_back_off_up_to_cap() {
        let policy = PollPolicy::default();
        assert_eq!(policy.next_delay(1, 1), Duration::from_millis(400));
        assert_eq!(policy.next_delay(1, 2), Duration::from_millis(800));
        assert_eq!(policy.next_delay(1, 30), Duration::from_secs(5));
        assert_eq!(policy.next_delay(0, 30), Duration::from_secs(5));
    }

    #[test]
    fn test_intervals_are_normalized() {
        let policy = PollPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.busy_interval(), MIN_INTERVAL);
        assert_eq!(policy.idle_interval(), MIN_INTERVAL);

        let inverted = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(inverted.idle_interval(), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn prop_delay_stays_within_bounds(pending in 0usize..1000, failures in 0u32..100) {
            let policy = PollPolicy::default();
            let delay = policy.next_delay(pending, failures);
            prop_assert!(delay >= policy.busy_interval());
            prop_assert!(delay <= Duration::from_secs(5));
        }
    }
}
