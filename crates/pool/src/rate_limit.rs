//! Per-registration rate limiting.
//!
//! Fixed-window counters for the request ceilings (second, minute, day) and
//! the daily token budget. Windows reset lazily: a counter whose window has
//! elapsed is cleared on the next access, and the next charge starts a new
//! window at that instant. No background timer is involved.
//!
//! A check is all-or-nothing: either every configured ceiling admits the
//! request and every counter is charged, or nothing is charged.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use kernel_pool_common::{Ceiling, LimitWindow, RateLimitDecision, RateLimitSnapshot, RateLimits};

/// Counter over one fixed window.
#[derive(Debug)]
struct WindowCounter {
    length: Duration,
    /// Start of the current window; `None` until the first charge
    start: Option<Instant>,
    used: u64,
}

impl WindowCounter {
    fn new(length: Duration) -> Self {
        Self {
            length,
            start: None,
            used: 0,
        }
    }

    /// Clear the counter if its window has elapsed.
    fn roll(&mut self, now: Instant) {
        if let Some(start) = self.start {
            if now.saturating_duration_since(start) >= self.length {
                self.start = None;
                self.used = 0;
            }
        }
    }

    fn charge(&mut self, now: Instant, amount: u64) {
        if self.start.is_none() {
            self.start = Some(now);
        }
        self.used = self.used.saturating_add(amount);
    }

    /// Time until this window resets. A window that has not started yet
    /// would start now, so a full window length is reported.
    fn retry_after(&self, now: Instant) -> Duration {
        match self.start {
            Some(start) => (start + self.length).saturating_duration_since(now),
            None => self.length,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    second: WindowCounter,
    minute: WindowCounter,
    day: WindowCounter,
    tokens: WindowCounter,
}

impl LimiterState {
    fn new() -> Self {
        Self {
            second: WindowCounter::new(LimitWindow::Second.duration()),
            minute: WindowCounter::new(LimitWindow::Minute.duration()),
            day: WindowCounter::new(LimitWindow::Day.duration()),
            tokens: WindowCounter::new(LimitWindow::Day.duration()),
        }
    }

    fn roll(&mut self, now: Instant) {
        self.second.roll(now);
        self.minute.roll(now);
        self.day.roll(now);
        self.tokens.roll(now);
    }

    fn counter(&self, window: LimitWindow) -> &WindowCounter {
        match window {
            LimitWindow::Second => &self.second,
            LimitWindow::Minute => &self.minute,
            LimitWindow::Day => &self.day,
        }
    }
}

/// Rate limiter for one registration.
///
/// Non-blocking: a denied request returns immediately with the time until
/// the rejecting window resets. All counters are updated under one short
/// lock, so concurrent callers never over-admit.
///
/// # Example
///
/// ```ignore
/// let limiter = RateLimiter::new(RateLimits::unlimited().with_per_second(2));
/// assert!(limiter.try_acquire(0));
/// assert!(limiter.try_acquire(0));
/// assert!(!limiter.try_acquire(0));
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    state: Mutex<LimiterState>,
    /// Optional name for logging
    name: Option<String>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given ceilings
    pub fn new(limits: RateLimits) -> Self {
        trace!(
            per_second = ?limits.per_second,
            per_minute = ?limits.per_minute,
            per_day = ?limits.per_day,
            tokens_per_day = ?limits.tokens_per_day,
            "Creating rate limiter"
        );

        Self {
            limits,
            state: Mutex::new(LimiterState::new()),
            name: None,
        }
    }

    /// Create a new rate limiter with a name for logging
    pub fn with_name(limits: RateLimits, name: impl Into<String>) -> Self {
        let name = name.into();

        debug!(
            name = %name,
            per_second = ?limits.per_second,
            per_minute = ?limits.per_minute,
            per_day = ?limits.per_day,
            tokens_per_day = ?limits.tokens_per_day,
            "Creating named rate limiter"
        );

        Self {
            limits,
            state: Mutex::new(LimiterState::new()),
            name: Some(name),
        }
    }

    /// Configured ceilings
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Try to admit one request consuming `tokens` from the daily budget.
    ///
    /// Returns `false` without charging anything if any ceiling would be
    /// exceeded.
    #[inline]
    pub fn try_acquire(&self, tokens: u64) -> bool {
        self.check(tokens).is_allowed()
    }

    /// Like [`try_acquire`](Self::try_acquire), reporting which ceiling
    /// rejected the request and when it resets.
    pub fn check(&self, tokens: u64) -> RateLimitDecision {
        self.check_at(tokens, Instant::now())
    }

    /// Check against an explicit clock reading.
    pub fn check_at(&self, tokens: u64, now: Instant) -> RateLimitDecision {
        let mut state = self.state.lock();
        state.roll(now);

        for (window, limit) in self.limits.request_ceilings() {
            let counter = state.counter(window);
            if counter.used >= u64::from(limit) {
                let retry_after = counter.retry_after(now);
                trace!(
                    name = ?self.name,
                    window = %window,
                    limit = limit,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Request ceiling reached"
                );
                return RateLimitDecision::Limited {
                    ceiling: Ceiling::Requests(window),
                    retry_after,
                };
            }
        }

        if let Some(budget) = self.limits.tokens_per_day {
            if state.tokens.used.saturating_add(tokens) > budget {
                let retry_after = state.tokens.retry_after(now);
                trace!(
                    name = ?self.name,
                    requested = tokens,
                    used = state.tokens.used,
                    budget = budget,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Token budget exhausted"
                );
                return RateLimitDecision::Limited {
                    ceiling: Ceiling::TokensPerDay,
                    retry_after,
                };
            }
        }

        state.second.charge(now, 1);
        state.minute.charge(now, 1);
        state.day.charge(now, 1);
        state.tokens.charge(now, tokens);

        let tokens_remaining = self
            .limits
            .tokens_per_day
            .map(|budget| budget.saturating_sub(state.tokens.used));

        trace!(
            name = ?self.name,
            tokens = tokens,
            tokens_remaining = ?tokens_remaining,
            "Request admitted"
        );

        RateLimitDecision::Allowed { tokens_remaining }
    }

    /// Current usage, with elapsed windows already cleared.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Usage against an explicit clock reading.
    pub fn snapshot_at(&self, now: Instant) -> RateLimitSnapshot {
        let mut state = self.state.lock();
        state.roll(now);

        RateLimitSnapshot {
            requests_this_second: state.second.used,
            requests_this_minute: state.minute.used,
            requests_today: state.day.used,
            tokens_today: state.tokens.used,
            tokens_remaining: self
                .limits
                .tokens_per_day
                .map(|budget| budget.saturating_sub(state.tokens.used)),
        }
    }

    /// Clear every counter.
    pub fn reset(&self) {
        *self.state.lock() = LimiterState::new();

        if let Some(ref name) = self.name {
            debug!(name = %name, "Rate limiter reset");
        } else {
            debug!("Rate limiter reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_unlimited_always_admits() {
        let limiter = RateLimiter::new(RateLimits::unlimited());
        for _ in 0..1000 {
            assert!(limiter.try_acquire(1_000_000));
        }
    }

    #[test]
    fn test_per_second_ceiling() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_per_second(2));
        let now = Instant::now();

        assert!(limiter.check_at(0, now).is_allowed());
        assert!(limiter.check_at(0, now + Duration::from_millis(100)).is_allowed());
        assert!(!limiter.check_at(0, now + Duration::from_millis(200)).is_allowed());

        // Window started at `now`; it resets one second later
        assert!(limiter.check_at(0, now + Duration::from_millis(1000)).is_allowed());
    }

    #[test]
    fn test_retry_after_reports_window_reset() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_per_second(1));
        let now = Instant::now();

        assert!(limiter.check_at(0, now).is_allowed());
        let decision = limiter.check_at(0, now + Duration::from_millis(300));
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                ceiling: Ceiling::Requests(LimitWindow::Second),
                retry_after: Duration::from_millis(700),
            }
        );
    }

    #[test]
    fn test_token_budget() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_tokens_per_day(100));
        let now = Instant::now();

        assert!(limiter.check_at(60, now).is_allowed());
        let denied = limiter.check_at(50, now);
        assert!(matches!(
            denied,
            RateLimitDecision::Limited {
                ceiling: Ceiling::TokensPerDay,
                ..
            }
        ));
        // 60 + 40 == 100 fits exactly
        assert_eq!(
            limiter.check_at(40, now),
            RateLimitDecision::Allowed {
                tokens_remaining: Some(0)
            }
        );
        assert!(!limiter.check_at(1, now).is_allowed());
    }

    #[test]
    fn test_token_budget_resets_after_a_day() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_tokens_per_day(10));
        let now = Instant::now();

        assert!(limiter.check_at(10, now).is_allowed());
        assert!(!limiter.check_at(1, now + Duration::from_secs(3600)).is_allowed());
        assert!(limiter.check_at(10, now + Duration::from_secs(86_400)).is_allowed());
    }

    #[test]
    fn test_oversized_request_is_denied() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_tokens_per_day(100));
        assert!(!limiter.try_acquire(101));
        assert_eq!(limiter.snapshot().tokens_today, 0);
    }

    #[test]
    fn test_zero_token_requests_count_against_request_ceilings() {
        let limiter = RateLimiter::new(
            RateLimits::unlimited()
                .with_per_minute(3)
                .with_tokens_per_day(5),
        );
        assert!(limiter.try_acquire(0));
        assert!(limiter.try_acquire(0));
        assert!(limiter.try_acquire(0));
        assert!(!limiter.try_acquire(0));

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.requests_this_minute, 3);
        assert_eq!(snapshot.tokens_today, 0);
        assert_eq!(snapshot.tokens_remaining, Some(5));
    }

    #[test]
    fn test_denied_request_charges_nothing() {
        let limiter = RateLimiter::new(
            RateLimits::unlimited()
                .with_per_second(10)
                .with_tokens_per_day(10),
        );
        let now = Instant::now();

        assert!(!limiter.check_at(11, now).is_allowed());
        let snapshot = limiter.snapshot_at(now);
        assert_eq!(snapshot.requests_this_second, 0);
        assert_eq!(snapshot.requests_today, 0);
    }

    #[test]
    fn test_snapshot_reports_counts_beyond_u32() {
        let limiter = RateLimiter::new(RateLimits::unlimited());
        let now = Instant::now();
        let busy = u64::from(u32::MAX) + 5;
        limiter.state.lock().day.charge(now, busy - 1);

        assert!(limiter.check_at(0, now).is_allowed());
        let snapshot = limiter.snapshot_at(now);
        assert_eq!(snapshot.requests_today, busy);
        assert_eq!(snapshot.requests_this_second, 1);
    }

    #[test]
    fn test_tightest_window_wins() {
        let limiter = RateLimiter::new(
            RateLimits::unlimited()
                .with_per_second(10)
                .with_per_minute(2),
        );
        let now = Instant::now();

        assert!(limiter.check_at(0, now).is_allowed());
        assert!(limiter.check_at(0, now).is_allowed());
        match limiter.check_at(0, now + Duration::from_secs(5)) {
            RateLimitDecision::Limited { ceiling, retry_after } => {
                assert_eq!(ceiling, Ceiling::Requests(LimitWindow::Minute));
                assert_eq!(retry_after, Duration::from_secs(55));
            }
            other => panic!("expected minute ceiling, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_ceiling_denies_everything() {
        let limiter = RateLimiter::new(RateLimits::unlimited().with_per_day(0));
        assert!(!limiter.try_acquire(0));
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::with_name(RateLimits::unlimited().with_per_day(1), "test");
        assert!(limiter.try_acquire(0));
        assert!(!limiter.try_acquire(0));
        limiter.reset();
        assert!(limiter.try_acquire(0));
    }

    #[test]
    fn test_concurrent_access_never_over_admits() {
        let limiter = Arc::new(RateLimiter::new(RateLimits::unlimited().with_per_day(500)));
        let mut handles = vec![];

        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(thread::spawn(move || {
                (0..200).filter(|_| limiter.try_acquire(0)).count()
            }));
        }

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 500);
    }

    proptest! {
        #[test]
        fn prop_tokens_within_a_day_never_exceed_budget(
            budget in 0u64..10_000,
            requests in proptest::collection::vec((0u64..2_000, 0u64..86_399), 1..64),
        ) {
            let limiter = RateLimiter::new(RateLimits::unlimited().with_tokens_per_day(budget));
            let start = Instant::now();
            let mut offsets: Vec<_> = requests.iter().map(|(_, secs)| *secs).collect();
            offsets.sort_unstable();

            let mut admitted = 0u64;
            for ((tokens, _), secs) in requests.iter().zip(offsets) {
                if limiter.check_at(*tokens, start + Duration::from_secs(secs)).is_allowed() {
                    admitted += tokens;
                }
            }
            prop_assert!(admitted <= budget);
        }

        #[test]
        fn prop_per_second_admits_exactly_the_ceiling(limit in 1u32..50, attempts in 1usize..200) {
            let limiter = RateLimiter::new(RateLimits::unlimited().with_per_second(limit));
            let now = Instant::now();
            let admitted = (0..attempts).filter(|_| limiter.check_at(0, now).is_allowed()).count();
            prop_assert_eq!(admitted, attempts.min(limit as usize));
        }
    }
}
