//! Reconnection backoff policy.
//!
//! Exponential backoff bounded by a cap. The policy is stateless: the
//! session manager owns the attempt counter and asks the policy for the
//! delay of each attempt and whether another attempt is allowed.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use dual_stream_session::RetryPolicy;
//!
//! let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 3);
//! assert_eq!(policy.next_delay(1), Duration::from_secs(1));
//! assert_eq!(policy.next_delay(3), Duration::from_secs(4));
//! assert!(policy.should_retry(3));
//! assert!(!policy.should_retry(4));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default upper bound on any single delay.
pub const DEFAULT_CAP_DELAY: Duration = Duration::from_millis(10_000);

/// Default number of automatic reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Capped exponential backoff.
///
/// `next_delay(n) = min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    cap_delay: Duration,
    max_attempts: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_CAP_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Creates a policy.
    ///
    /// A cap smaller than the base is raised to the base.
    #[inline]
    #[must_use]
    pub fn new(base_delay: Duration, cap_delay: Duration, max_attempts: u8) -> Self {
        Self {
            base_delay,
            cap_delay: cap_delay.max(base_delay),
            max_attempts,
        }
    }

    /// Returns the delay to wait before `attempt` (1-based).
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn next_delay(&self, attempt: u8) -> Duration {
        let exponent = u32::from(attempt.saturating_sub(1));
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }

    /// Returns `true` while `attempt` is within the budget.
    #[inline]
    #[must_use]
    pub fn should_retry(&self, attempt: u8) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before the first retry.
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound on any delay.
    #[inline]
    #[must_use]
    pub fn cap_delay(&self) -> Duration {
        self.cap_delay
    }

    /// Number of attempts allowed.
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }
}

// ============================================================================
// Tests
// ============================================================================
