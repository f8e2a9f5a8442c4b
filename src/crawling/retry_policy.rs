//! 재시도 정책 - exponential backoff with jitter
//!
//! Shared by the runner's per-URL attempt loop and the discovery HTTP client.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::site::PacingProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_ms: u64,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration, jitter_ms: u64) -> Self {
        Self { base, max, jitter_ms }
    }

    pub const fn from_profile(profile: &PacingProfile) -> Self {
        Self {
            base: Duration::from_millis(profile.retry_base_delay_ms),
            max: Duration::from_millis(profile.retry_max_delay_ms),
            jitter_ms: profile.retry_jitter_ms,
        }
    }

    /// `base * 2^attempt` capped at `max`, plus up to `jitter_ms` of jitter.
    /// `attempt` is zero-based: the first retry waits roughly `base`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31));
        let exponential = self.base.saturating_mul(factor).min(self.max);
        exponential + Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
    }

    /// Honor a server `Retry-After` hint when present, otherwise back off.
    /// The hint is capped at `max`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or_else(|| self.delay_for(attempt), |hint| hint.min(self.max))
    }
}

/// Parse a `Retry-After` header: either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok().or(Some(Duration::ZERO))
}
