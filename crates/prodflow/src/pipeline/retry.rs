//! Retry/backoff policy.
//!
//! A pure decision function: given the stage, the failures recorded so
//! far and the failure classification, either retry after a delay or
//! park the item. Delays grow exponentially with the attempt number up
//! to a cap. The ceiling and delays come from configuration, never from
//! call sites, so the policy is testable in isolation.

use std::time::Duration;

use crate::stage::Stage;

use super::error::ErrorKind;

/// What to do about a failed stage attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the item at its current status; it becomes eligible again
    /// once `delay` has elapsed.
    Retry { delay: Duration },
    /// Park the item as permanently invalid.
    Fail,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed per stage before the item is parked.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap on the backoff growth.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Decides the fate of a failed attempt. `attempts` is the failure
    /// count recorded *before* this failure; the failure being decided
    /// is attempt `attempts + 1`.
    pub fn decide(&self, stage: Stage, attempts: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            // Re-attempting a confirmed-absent resource cannot succeed.
            ErrorKind::ConfirmedAbsent => RetryDecision::Fail,
            ErrorKind::RetryableRemote | ErrorKind::UnexpectedContent => {
                let this_attempt = attempts + 1;
                if this_attempt >= self.max_attempts {
                    log::warn!(
                        "Stage '{}' exhausted {} attempts, parking item",
                        stage,
                        this_attempt
                    );
                    RetryDecision::Fail
                } else {
                    RetryDecision::Retry {
                        delay: self.delay_for_attempt(this_attempt),
                    }
                }
            }
        }
    }

    /// Backoff for a given attempt number (1-indexed): base * 2^(n-1),
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 1u64 << (attempt - 1).min(32);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy(10);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(800));
        // Far past the cap.
        assert_eq!(p.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn test_confirmed_absent_fails_on_first_attempt() {
        let p = policy(5);
        assert_eq!(
            p.decide(Stage::Fetch, 0, ErrorKind::ConfirmedAbsent),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_retryable_until_ceiling() {
        let p = policy(3);
        // Failures 1 and 2 retry; failure 3 hits the ceiling.
        assert!(matches!(
            p.decide(Stage::MediaAcquire, 0, ErrorKind::RetryableRemote),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            p.decide(Stage::MediaAcquire, 1, ErrorKind::RetryableRemote),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            p.decide(Stage::MediaAcquire, 2, ErrorKind::RetryableRemote),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_unexpected_content_shares_ceiling() {
        let p = policy(2);
        assert!(matches!(
            p.decide(Stage::Fetch, 0, ErrorKind::UnexpectedContent),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(
            p.decide(Stage::Fetch, 1, ErrorKind::UnexpectedContent),
            RetryDecision::Fail
        );
    }

    #[test]
    fn test_retry_delay_tracks_attempt_number() {
        let p = policy(10);
        let RetryDecision::Retry { delay } =
            p.decide(Stage::Translate, 2, ErrorKind::RetryableRemote)
        else {
            panic!("expected retry");
        };
        // Third failure — attempt 3.
        assert_eq!(delay, p.delay_for_attempt(3));
    }
}
