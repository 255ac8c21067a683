//! Rate ceiling configuration and decision types.
//!
//! This module provides the value types shared by the rate limiter and the
//! configuration loader:
//! - Per-registration request ceilings over fixed windows
//! - A daily token budget
//!
//! # Windows
//!
//! Every ceiling is counted over a fixed window (one second, one minute or
//! one day). A window starts on the first request after the previous window
//! elapsed, so windows roll forward lazily instead of being aligned to wall
//! clock boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Limit Configuration
// ============================================================================

/// Optional rate ceilings for one registration.
///
/// Every field is independently optional; an unset ceiling imposes no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Maximum requests per second
    #[serde(default)]
    pub per_second: Option<u32>,

    /// Maximum requests per minute
    #[serde(default)]
    pub per_minute: Option<u32>,

    /// Maximum requests per day
    #[serde(default)]
    pub per_day: Option<u32>,

    /// Maximum tokens per day
    #[serde(default)]
    pub tokens_per_day: Option<u64>,
}

impl RateLimits {
    /// No ceilings at all.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_per_second(mut self, limit: u32) -> Self {
        self.per_second = Some(limit);
        self
    }

    pub fn with_per_minute(mut self, limit: u32) -> Self {
        self.per_minute = Some(limit);
        self
    }

    pub fn with_per_day(mut self, limit: u32) -> Self {
        self.per_day = Some(limit);
        self
    }

    pub fn with_tokens_per_day(mut self, limit: u64) -> Self {
        self.tokens_per_day = Some(limit);
        self
    }

    /// Returns true if no ceiling is configured.
    pub fn is_unlimited(&self) -> bool {
        self.per_second.is_none()
            && self.per_minute.is_none()
            && self.per_day.is_none()
            && self.tokens_per_day.is_none()
    }

    /// Configured request ceilings, paired with their window.
    pub fn request_ceilings(&self) -> impl Iterator<Item = (LimitWindow, u32)> {
        [
            (LimitWindow::Second, self.per_second),
            (LimitWindow::Minute, self.per_minute),
            (LimitWindow::Day, self.per_day),
        ]
        .into_iter()
        .filter_map(|(window, limit)| limit.map(|l| (window, l)))
    }
}

/// Fixed window a ceiling is counted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    /// One second
    Second,
    /// One minute
    Minute,
    /// One day (86400 seconds)
    Day,
}

impl LimitWindow {
    /// Get the window length in seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            LimitWindow::Second => 1,
            LimitWindow::Minute => 60,
            LimitWindow::Day => 86_400,
        }
    }

    /// Get the window length.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitWindow::Second => write!(f, "second"),
            LimitWindow::Minute => write!(f, "minute"),
            LimitWindow::Day => write!(f, "day"),
        }
    }
}

/// The ceiling that rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// A request-count ceiling over the given window
    Requests(LimitWindow),
    /// The daily token budget
    TokensPerDay,
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Requests(window) => write!(f, "requests per {}", window),
            Ceiling::TokensPerDay => write!(f, "tokens per day"),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// Request admitted; all configured counters were charged
    Allowed {
        /// Tokens left in the daily budget, if one is configured
        tokens_remaining: Option<u64>,
    },
    /// Request rejected; nothing was charged
    Limited {
        /// First ceiling that rejected the request
        ceiling: Ceiling,
        /// Time until that ceiling's window resets
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    /// Returns true if the request should be allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns the retry-after duration, or zero if allowed.
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Limited { retry_after, .. } => *retry_after,
            Self::Allowed { .. } => Duration::ZERO,
        }
    }
}

/// Point-in-time usage of one rate limiter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    /// Requests counted in the current second window
    pub requests_this_second: u64,
    /// Requests counted in the current minute window
    pub requests_this_minute: u64,
    /// Requests counted in the current day window
    pub requests_today: u64,
    /// Tokens consumed in the current day window
    pub tokens_today: u64,
    /// Tokens left in the daily budget, if one is configured
    pub tokens_remaining: Option<u64>,
}

// ============================================================================
// Tests
// ============================================================================
