//! Retry delays for failed certificate renewals.

use std::time::Duration;

use smartvpn_core::config::CertificateConfig;

/// Exponential backoff: the n-th consecutive failure waits `base * 2^n`,
/// never longer than `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffPolicy {
    pub const fn from_config(config: &CertificateConfig) -> Self {
        Self {
            base: Duration::from_secs(config.backoff_base_secs),
            max_delay: Duration::from_secs(config.max_backoff_secs),
        }
    }

    /// Delay after `failures` consecutive failures (1-based).
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_twice_the_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_failures(1), Duration::from_secs(20));
        assert_eq!(policy.delay_for_failures(2), Duration::from_secs(40));
        assert_eq!(policy.delay_for_failures(3), Duration::from_secs(80));
        assert_eq!(policy.delay_for_failures(8), Duration::from_secs(2_560));
    }

    #[test]
    fn capped_at_max_delay() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_failures(9), Duration::from_secs(3_600));
        assert_eq!(policy.delay_for_failures(31), Duration::from_secs(3_600));
        // Shift overflow does not panic.
        assert_eq!(policy.delay_for_failures(200), Duration::from_secs(3_600));
    }

    #[test]
    fn built_from_config() {
        let config = CertificateConfig {
            refresh_skew_secs: 60,
            backoff_base_secs: 2,
            max_backoff_secs: 30,
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.delay_for_failures(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_failures(4), Duration::from_secs(30));
    }
}
