//! Failed-login counting and lock transitions.
//!
//! ```text
//! Active --failure (count < threshold)--> Active      (count + 1)
//! Active --failure (count == threshold)--> Locked(now + duration)
//! Locked(until) --now >= until--> Active              (lazy, on next attempt)
//! Active --success--> Active                          (count = 0)
//! Disabled: administrative only
//! ```
//!
//! The transition itself is the pure [`LockoutPolicy::register_failure`];
//! stores apply it as one atomic read-modify-write.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a lock (inclusive).
    pub max_failed_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lock_duration: Duration::minutes(30),
        }
    }
}

/// The lockout columns of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

impl LockoutPolicy {
    /// State after one more bad password at `now`.
    ///
    /// An elapsed lock ends its episode: counting restarts from zero and the
    /// stale timestamp is cleared.
    pub fn register_failure(&self, current: LockoutState, now: DateTime<Utc>) -> LockoutState {
        let lock_elapsed = matches!(current.locked_until, Some(until) if until <= now);
        let base = if lock_elapsed { 0 } else { current.failed_attempts };
        let failed_attempts = base.saturating_add(1);

        let locked_until = if failed_attempts >= self.max_failed_attempts {
            Some(now + self.lock_duration)
        } else if lock_elapsed {
            None
        } else {
            current.locked_until
        };

        LockoutState {
            failed_attempts,
            locked_until,
        }
    }

    /// `true` when `next` is the attempt that crossed the threshold.
    pub fn just_locked(&self, previous: LockoutState, next: LockoutState, now: DateTime<Utc>) -> bool {
        next.is_locked(now) && !previous.is_locked(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> LockoutPolicy {
        LockoutPolicy::default()
    }

    #[test]
    fn threshold_minus_one_failures_stay_unlocked() {
        let now = Utc::now();
        let mut state = LockoutState::default();
        for _ in 0..4 {
            state = policy().register_failure(state, now);
        }
        assert_eq!(state.failed_attempts, 4);
        assert!(!state.is_locked(now));
    }

    #[test]
    fn threshold_failure_locks_for_duration() {
        let now = Utc::now();
        let before = LockoutState {
            failed_attempts: 4,
            locked_until: None,
        };
        let after = policy().register_failure(before, now);
        assert_eq!(after.failed_attempts, 5);
        assert_eq!(after.locked_until, Some(now + Duration::minutes(30)));
        assert!(policy().just_locked(before, after, now));
    }

    #[test]
    fn failure_after_elapsed_lock_restarts_count() {
        let now = Utc::now();
        let expired = LockoutState {
            failed_attempts: 5,
            locked_until: Some(now - Duration::minutes(1)),
        };
        let next = policy().register_failure(expired, now);
        assert_eq!(next.failed_attempts, 1);
        assert_eq!(next.locked_until, None);
    }

    #[test]
    fn threshold_of_one_locks_immediately() {
        let now = Utc::now();
        let p = LockoutPolicy {
            max_failed_attempts: 1,
            lock_duration: Duration::seconds(10),
        };
        assert!(p.register_failure(LockoutState::default(), now).is_locked(now));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: starting fresh, the account is locked exactly when the
        /// number of consecutive failures reaches the threshold.
        #[test]
        fn locks_exactly_at_threshold(threshold in 1u32..20, failures in 0u32..40) {
            let now = Utc::now();
            let p = LockoutPolicy { max_failed_attempts: threshold, lock_duration: Duration::minutes(30) };
            let mut state = LockoutState::default();
            for _ in 0..failures {
                state = p.register_failure(state, now);
            }
            prop_assert_eq!(state.is_locked(now), failures >= threshold);
            prop_assert_eq!(state.failed_attempts, failures);
        }
    }
}
