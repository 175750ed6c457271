//! crates/reading_log_core/src/rate_limit.rs
//!
//! Fixed-window attempt counting keyed by client IP.
//!
//! The window is anchored on the most recent recorded attempt: once the last
//! attempt is older than the window, the counter restarts at 1. Rejected
//! attempts are not recorded.

use chrono::{DateTime, Duration, Utc};

use crate::domain::RateLimitCounter;
use crate::ports::RateDecision;

/// Limits applied to link-code verification attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::seconds(60),
        }
    }
}

impl RateLimitPolicy {
    /// Whether `counter` lies wholly outside the window ending at `now` and
    /// would restart on the next attempt.
    pub fn is_expired(&self, counter: &RateLimitCounter, now: DateTime<Utc>) -> bool {
        counter.last_attempt <= now - self.window
    }

    /// Decides one attempt against the stored counter.
    ///
    /// Returns the decision and, when the attempt is allowed, the counter value
    /// to persist in place of `existing`.
    pub fn register_attempt(
        &self,
        existing: Option<RateLimitCounter>,
        now: DateTime<Utc>,
    ) -> (RateDecision, Option<RateLimitCounter>) {
        let attempts = match existing {
            Some(counter) if !self.is_expired(&counter, now) => {
                if counter.attempts >= self.max_attempts {
                    let remaining = counter.last_attempt + self.window - now;
                    let retry_after_secs = remaining.num_seconds().max(0) as u64 + 1;
                    return (RateDecision::Exceeded { retry_after_secs }, None);
                }
                counter.attempts + 1
            }
            _ => 1,
        };

        let counter = RateLimitCounter {
            attempts,
            last_attempt: now,
        };
        (RateDecision::Allowed { attempts }, Some(counter))
    }
}

/// The storage key for verification attempts from one client address.
pub fn verification_key(client_ip: &str) -> String {
    format!("verify_attempt_{}", client_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn run(policy: &RateLimitPolicy, times: &[i64]) -> Vec<RateDecision> {
        let mut stored = None;
        times
            .iter()
            .map(|t| {
                let (decision, next) = policy.register_attempt(stored, at(*t));
                if next.is_some() {
                    stored = next;
                }
                decision
            })
            .collect()
    }

    #[test]
    fn first_attempt_starts_at_one() {
        let (decision, next) = RateLimitPolicy::default().register_attempt(None, at(0));
        assert_eq!(decision, RateDecision::Allowed { attempts: 1 });
        assert_eq!(next.unwrap().attempts, 1);
    }

    #[test]
    fn eleventh_attempt_in_window_is_rejected() {
        let times: Vec<i64> = (0..11).collect();
        let decisions = run(&RateLimitPolicy::default(), &times);
        assert!(decisions[..10]
            .iter()
            .all(|d| matches!(d, RateDecision::Allowed { .. })));
        assert!(matches!(decisions[10], RateDecision::Exceeded { .. }));
    }

    #[test]
    fn stale_counter_resets_to_one() {
        let policy = RateLimitPolicy::default();
        let existing = RateLimitCounter {
            attempts: 10,
            last_attempt: at(0),
        };
        let (decision, next) = policy.register_attempt(Some(existing), at(61));
        assert_eq!(decision, RateDecision::Allowed { attempts: 1 });
        assert_eq!(next.unwrap().last_attempt, at(61));
    }

    #[test]
    fn exactly_one_window_old_counts_as_stale() {
        let policy = RateLimitPolicy::default();
        let existing = RateLimitCounter {
            attempts: 10,
            last_attempt: at(0),
        };
        let (decision, _) = policy.register_attempt(Some(existing), at(60));
        assert_eq!(decision, RateDecision::Allowed { attempts: 1 });
    }

    #[test]
    fn rejection_does_not_touch_the_counter() {
        let policy = RateLimitPolicy::default();
        let existing = RateLimitCounter {
            attempts: 10,
            last_attempt: at(30),
        };
        let (decision, next) = policy.register_attempt(Some(existing), at(40));
        assert_eq!(decision, RateDecision::Exceeded { retry_after_secs: 51 });
        assert!(next.is_none());
    }

    #[test]
    fn key_embeds_the_ip() {
        assert_eq!(verification_key("10.0.0.1"), "verify_attempt_10.0.0.1");
    }
}
