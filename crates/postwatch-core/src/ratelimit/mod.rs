//! Connection attempt rate limiting
//!
//! In-memory per-owner limiter for mailbox connection attempts. Two
//! sliding windows bound attempt volume, and consecutive authentication
//! failures beyond a threshold trigger an exponential block. State lives
//! behind one mutex; entries are purged once an owner has been idle for
//! an hour.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use postwatch_common::config::RateLimitConfig;
use postwatch_common::types::OwnerId;
use tracing::{debug, info, warn};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Limited {
        reason: &'static str,
        retry_after_secs: u64,
    },
}

impl LimitDecision {
    pub fn is_limited(&self) -> bool {
        matches!(self, LimitDecision::Limited { .. })
    }
}

/// Per-owner stats snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerStats {
    pub attempts_last_minute: usize,
    pub attempts_last_hour: usize,
    pub consecutive_failures: u32,
    pub blocked_secs_remaining: u64,
}

#[derive(Default)]
struct OwnerState {
    attempts: Vec<Instant>,
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

struct LimiterState {
    owners: HashMap<OwnerId, OwnerState>,
    last_cleanup: Instant,
}

pub struct AttemptRateLimiter {
    config: RateLimitConfig,
    inner: Mutex<LimiterState>,
}

impl AttemptRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(LimiterState {
                owners: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Reserve a connection attempt for an owner. When allowed, the
    /// attempt is recorded under the same lock as the check, so two
    /// concurrent callers can never both slip under a full window.
    pub fn try_acquire(&self, owner: OwnerId) -> LimitDecision {
        self.try_acquire_at(owner, Instant::now())
    }

    fn try_acquire_at(&self, owner: OwnerId, now: Instant) -> LimitDecision {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::maybe_cleanup(&mut state, now);

        let entry = state.owners.entry(owner).or_default();

        if let Some(until) = entry.blocked_until {
            if until > now {
                return LimitDecision::Limited {
                    reason: "too many failed authentication attempts",
                    retry_after_secs: (until - now).as_secs(),
                };
            }
            // block expired, failures are forgiven with it
            entry.blocked_until = None;
            entry.consecutive_failures = 0;
        }

        let last_minute = entry.attempts.iter().filter(|t| now - **t < MINUTE).count();
        if last_minute >= self.config.max_attempts_per_minute {
            return LimitDecision::Limited {
                reason: "too many connection attempts per minute",
                retry_after_secs: 60,
            };
        }

        let last_hour = entry.attempts.iter().filter(|t| now - **t < HOUR).count();
        if last_hour >= self.config.max_attempts_per_hour {
            return LimitDecision::Limited {
                reason: "too many connection attempts per hour",
                retry_after_secs: 3600,
            };
        }

        entry.attempts.push(now);
        LimitDecision::Allowed
    }

    /// Record the outcome of a previously acquired connection attempt
    pub fn record_outcome(&self, owner: OwnerId, success: bool, label: &str) {
        self.record_outcome_at(owner, success, label, Instant::now());
    }

    fn record_outcome_at(&self, owner: OwnerId, success: bool, label: &str, now: Instant) {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = state.owners.entry(owner).or_default();

        if success {
            if entry.consecutive_failures > 0 {
                info!(%owner, label, "successful connection, failure count reset");
            }
            entry.consecutive_failures = 0;
            entry.blocked_until = None;
            return;
        }

        entry.consecutive_failures += 1;
        let failures = entry.consecutive_failures;
        warn!(%owner, label, failures, "failed mailbox connection");

        if failures > self.config.max_failed_attempts {
            let block = self.backoff_duration(failures);
            entry.blocked_until = Some(now + block);
            warn!(
                %owner,
                label,
                failures,
                block_secs = block.as_secs(),
                "owner blocked after repeated failures"
            );
        }
    }

    /// base * 2^excess, exponent capped at 6, duration capped at the max
    fn backoff_duration(&self, failures: u32) -> Duration {
        let excess = failures.saturating_sub(self.config.max_failed_attempts).min(6);
        let secs = self
            .config
            .backoff_base_secs
            .saturating_mul(1u64 << excess)
            .min(self.config.backoff_max_secs);
        Duration::from_secs(secs)
    }

    pub fn stats(&self, owner: OwnerId) -> OwnerStats {
        self.stats_at(owner, Instant::now())
    }

    fn stats_at(&self, owner: OwnerId, now: Instant) -> OwnerStats {
        let state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = state.owners.get(&owner);
        let attempts = entry.map(|e| e.attempts.as_slice()).unwrap_or_default();

        OwnerStats {
            attempts_last_minute: attempts.iter().filter(|t| now - **t < MINUTE).count(),
            attempts_last_hour: attempts.iter().filter(|t| now - **t < HOUR).count(),
            consecutive_failures: entry.map_or(0, |e| e.consecutive_failures),
            blocked_secs_remaining: entry
                .and_then(|e| e.blocked_until)
                .filter(|until| *until > now)
                .map_or(0, |until| (until - now).as_secs()),
        }
    }

    /// Forget all state for one owner. Returns whether any state existed.
    pub fn reset(&self, owner: OwnerId) -> bool {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let had_state = state.owners.remove(&owner).is_some();
        if had_state {
            info!(%owner, "rate limit state reset");
        }
        had_state
    }

    /// Drop owners with no attempts in the last hour and no active block
    pub fn purge_stale(&self) {
        self.purge_stale_at(Instant::now());
    }

    fn purge_stale_at(&self, now: Instant) {
        let mut state = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::cleanup(&mut state, now);
    }

    fn maybe_cleanup(state: &mut LimiterState, now: Instant) {
        if now - state.last_cleanup < CLEANUP_INTERVAL {
            return;
        }
        Self::cleanup(state, now);
    }

    fn cleanup(state: &mut LimiterState, now: Instant) {
        state.owners.retain(|_, entry| {
            entry.attempts.retain(|t| now - *t < HOUR);
            if let Some(until) = entry.blocked_until {
                if until <= now {
                    entry.blocked_until = None;
                    entry.consecutive_failures = 0;
                }
            }
            !entry.attempts.is_empty() || entry.blocked_until.is_some()
        });
        state.last_cleanup = now;
        debug!(active_owners = state.owners.len(), "rate limiter cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter() -> AttemptRateLimiter {
        AttemptRateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn test_allows_under_the_limits() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..10 {
            assert_eq!(limiter.try_acquire_at(owner, now), LimitDecision::Allowed);
        }
    }

    #[test]
    fn test_minute_window_limits_eleventh_attempt() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.try_acquire_at(owner, now);
        }
        assert_eq!(
            limiter.try_acquire_at(owner, now),
            LimitDecision::Limited {
                reason: "too many connection attempts per minute",
                retry_after_secs: 60,
            }
        );
    }

    #[test]
    fn test_full_window_denies_every_concurrent_caller_but_one() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..9 {
            limiter.try_acquire_at(owner, now);
        }
        // one slot left: exactly one of two back-to-back acquires wins
        assert_eq!(limiter.try_acquire_at(owner, now), LimitDecision::Allowed);
        assert!(limiter.try_acquire_at(owner, now).is_limited());
        assert_eq!(limiter.stats_at(owner, now).attempts_last_minute, 10);
    }

    #[test]
    fn test_minute_window_slides() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let start = Instant::now();

        for _ in 0..10 {
            limiter.try_acquire_at(owner, start);
        }
        let later = start + Duration::from_secs(61);
        assert_eq!(limiter.try_acquire_at(owner, later), LimitDecision::Allowed);
    }

    #[test]
    fn test_hour_window_limit() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let start = Instant::now();

        // spread attempts so the minute window never trips
        for i in 0..60u64 {
            let at = start + Duration::from_secs(i * 30);
            assert_eq!(limiter.try_acquire_at(owner, at), LimitDecision::Allowed);
        }
        let now = start + Duration::from_secs(60 * 30 + 1);
        assert_eq!(
            limiter.try_acquire_at(owner, now),
            LimitDecision::Limited {
                reason: "too many connection attempts per hour",
                retry_after_secs: 3600,
            }
        );
    }

    #[test]
    fn test_failures_within_threshold_do_not_block() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..5 {
            limiter.record_outcome_at(owner, false, "primary", now);
        }
        assert_eq!(limiter.try_acquire_at(owner, now), LimitDecision::Allowed);
    }

    #[test]
    fn test_sixth_failure_blocks_with_base_backoff() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..6 {
            limiter.record_outcome_at(owner, false, "primary", now);
        }
        match limiter.try_acquire_at(owner, now) {
            LimitDecision::Limited {
                reason,
                retry_after_secs,
            } => {
                assert_eq!(reason, "too many failed authentication attempts");
                assert!(retry_after_secs <= 120 && retry_after_secs >= 100);
            }
            LimitDecision::Allowed => panic!("expected a block"),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let limiter = limiter();
        // excess 1 -> 120s, excess 3 -> 480s, excess capped at 6 -> 3600s cap
        assert_eq!(limiter.backoff_duration(6), Duration::from_secs(120));
        assert_eq!(limiter.backoff_duration(8), Duration::from_secs(480));
        assert_eq!(limiter.backoff_duration(11), Duration::from_secs(3600));
        assert_eq!(limiter.backoff_duration(100), Duration::from_secs(3600));
    }

    #[test]
    fn test_success_resets_failures_and_block() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        for _ in 0..7 {
            limiter.record_outcome_at(owner, false, "primary", now);
        }
        assert!(limiter.try_acquire_at(owner, now).is_limited());

        limiter.record_outcome_at(owner, true, "primary", now);
        assert_eq!(limiter.stats_at(owner, now).consecutive_failures, 0);
        assert_eq!(limiter.stats_at(owner, now).blocked_secs_remaining, 0);
    }

    #[test]
    fn test_expired_block_forgives_failures() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let start = Instant::now();

        for _ in 0..6 {
            limiter.record_outcome_at(owner, false, "primary", start);
        }
        let after_block = start + Duration::from_secs(121);
        assert_eq!(
            limiter.try_acquire_at(owner, after_block),
            LimitDecision::Allowed
        );
        assert_eq!(limiter.stats_at(owner, after_block).consecutive_failures, 0);
    }

    #[test]
    fn test_stats_snapshot() {
        let limiter = limiter();
        let owner = Uuid::now_v7();
        let now = Instant::now();

        let later = now + Duration::from_secs(120);
        limiter.try_acquire_at(owner, now);
        limiter.record_outcome_at(owner, true, "primary", now);
        limiter.try_acquire_at(owner, later);
        limiter.record_outcome_at(owner, false, "primary", later);

        let stats = limiter.stats_at(owner, later);
        assert_eq!(stats.attempts_last_minute, 1);
        assert_eq!(stats.attempts_last_hour, 2);
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.blocked_secs_remaining, 0);
    }

    #[test]
    fn test_reset_forgets_owner() {
        let limiter = limiter();
        let owner = Uuid::now_v7();

        limiter.try_acquire(owner);
        limiter.record_outcome(owner, false, "primary");
        assert!(limiter.reset(owner));
        assert!(!limiter.reset(owner));
        assert_eq!(limiter.stats(owner).attempts_last_hour, 0);
    }

    #[test]
    fn test_purge_drops_idle_owners_only() {
        let limiter = limiter();
        let idle = Uuid::now_v7();
        let active = Uuid::now_v7();
        let start = Instant::now();
        let now = start + Duration::from_secs(7200);

        limiter.try_acquire_at(idle, start);
        limiter.try_acquire_at(active, now);
        limiter.purge_stale_at(now);

        assert_eq!(limiter.stats_at(idle, now).attempts_last_hour, 0);
        assert_eq!(limiter.stats_at(active, now).attempts_last_hour, 1);
    }
}
