use std::time::Duration;

/// Absolute ceiling on the retry counter. A count past this is not a busy
/// message, it is a corrupted one, and the worker refuses to touch it.
pub const HARD_RETRY_CEILING: u32 = 100;

/// Immutable retry parameters shared by every worker on an instance.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt. Total attempts for an
    /// exhausted message is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub hard_ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            hard_ceiling: HARD_RETRY_CEILING,
        }
    }
}

/// What the worker does with a message whose attempt just failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue { delay: Duration },
    DeadLetter,
}

impl RetryPolicy {
    /// Exponential delay before the given retry. `retry_count` is the value
    /// already incremented for the upcoming attempt, so the first retry
    /// (count 1) waits exactly `base_delay`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// Routes a failed message. `retry_count` must already include the
    /// increment for the attempt that just failed.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count > self.max_retries {
            RetryDecision::DeadLetter
        } else {
            RetryDecision::Requeue {
                delay: self.backoff_delay(retry_count),
            }
        }
    }

    /// True when a counter read off the wire is past the hard ceiling and
    /// must not enter the retry machinery at all.
    pub fn is_corrupt(&self, retry_count: u32) -> bool {
        retry_count > self.hard_ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(60));
        // Shift widths past u64 range must not wrap.
        assert_eq!(policy.backoff_delay(90), Duration::from_secs(60));
    }

    #[test]
    fn exhaustion_after_max_retries() {
        let policy = RetryPolicy::default();
        assert!(matches!(policy.decide(3), RetryDecision::Requeue { .. }));
        assert_eq!(policy.decide(4), RetryDecision::DeadLetter);
    }

    #[test]
    fn ceiling_flags_corrupt_counters() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_corrupt(100));
        assert!(policy.is_corrupt(101));
    }
}
