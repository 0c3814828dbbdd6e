//! Reconnect policy and budget accounting for status subscriptions.
//!
//! The budget counts *consecutive* failed connection attempts. Every
//! successfully opened channel resets it, so a long-lived watch that
//! occasionally drops and recovers never exhausts its budget.

use std::time::Duration;

/// Default ceiling on consecutive failed connection attempts.
pub const DEFAULT_MAX_RECONNECTS: u32 = 5;

/// Default wait between attempts when the server does not suggest one.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

/// Default limit on how long a single connection attempt may take to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(150_000);

/// Tuning knobs for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Consecutive failed attempts tolerated before the watch aborts.
    pub max_reconnects: u32,
    /// Wait between attempts, unless an error frame suggests its own delay.
    pub reconnect_delay: Duration,
    /// An attempt still unopened after this long counts as failed.
    pub connect_timeout: Duration,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Running count of consecutive connection failures against a ceiling.
#[derive(Debug, Clone)]
pub struct ReconnectBudget {
    max: u32,
    consecutive_failures: u32,
}

impl ReconnectBudget {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            consecutive_failures: 0,
        }
    }

    /// A channel opened; the failure streak is over.
    pub fn record_open(&mut self) {
        self.consecutive_failures = 0;
    }

    /// A connection attempt failed or an open channel broke.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Whether another connection attempt is allowed.
    pub fn is_exhausted(&self) -> bool {
        self.consecutive_failures >= self.max
    }

    /// Consecutive failures since the last successful open.
    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults() {
        let policy = WatchPolicy::default();
        assert_eq!(policy.max_reconnects, 5);
        assert_eq!(policy.reconnect_delay, Duration::from_millis(5_000));
        assert_eq!(policy.connect_timeout, Duration::from_millis(150_000));
    }

    #[test]
    fn budget_exhausts_after_max_consecutive_failures() {
        let mut budget = ReconnectBudget::new(3);
        assert!(!budget.is_exhausted());

        budget.record_failure();
        budget.record_failure();
        assert!(!budget.is_exhausted());
        assert_eq!(budget.failures(), 2);

        budget.record_failure();
        assert!(budget.is_exhausted());
        assert_eq!(budget.failures(), 3);
    }

    #[test]
    fn successful_open_resets_the_streak() {
        let mut budget = ReconnectBudget::new(2);
        budget.record_failure();
        assert_eq!(budget.failures(), 1);

        budget.record_open();
        assert_eq!(budget.failures(), 0);

        // A fresh streak gets the full budget again.
        budget.record_failure();
        assert!(!budget.is_exhausted());
        budget.record_failure();
        assert!(budget.is_exhausted());
    }

    #[test]
    fn zero_budget_is_exhausted_from_the_start() {
        let budget = ReconnectBudget::new(0);
        assert!(budget.is_exhausted());
    }
}
