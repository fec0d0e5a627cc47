use std::time::Duration;

/// Exponential reconnect backoff: `min(base * 2^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scheduled reconnects before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let p = ReconnectPolicy::default();
        let secs: Vec<u64> = (1..=8).map(|a| p.delay_for(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = ReconnectPolicy {
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_secs(90),
            max_attempts: 100,
        };
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(90));
        assert_eq!(p.delay_for(0), Duration::from_millis(1500));
    }
}
