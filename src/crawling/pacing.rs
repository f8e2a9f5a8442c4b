//! # Pacing Controller
//!
//! Turns "seconds since the run started" into a request rate using the
//! site's warm-up ramp, capped by the host ceiling. The free functions are
//! pure; [`Pacer`] applies them to a running crawl.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::domain::site::PacingConfig;

/// Target requests per second after `elapsed_secs`.
///
/// The last ramp step whose threshold has been reached wins. Before the
/// first threshold the first step applies; an empty ramp falls back to the
/// ceiling. The result never exceeds `max_rate_per_sec`.
pub fn target_rate(config: &PacingConfig, elapsed_secs: f64) -> f64 {
    let ceiling = config.max_rate_per_sec;
    let stepped = config
        .ramp
        .iter()
        .take_while(|step| step.after_secs <= elapsed_secs)
        .last()
        .or_else(|| config.ramp.first())
        .map_or(ceiling, |step| step.rate);

    let rate = stepped.min(ceiling);
    if rate > 0.0 { rate } else { ceiling.max(0.0) }
}

/// Minimum time between two request starts at `elapsed_secs`:
/// `max(1000 / rate, min_spacing_ms)`.
pub fn min_spacing(config: &PacingConfig, elapsed_secs: f64) -> Duration {
    let rate = target_rate(config, elapsed_secs);
    let from_rate = if rate > 0.0 { 1000.0 / rate } else { 0.0 };
    let millis = from_rate.max(config.min_spacing_ms as f64);
    Duration::from_secs_f64(millis / 1000.0)
}

/// Uniform random delay in `[min_jitter_ms, max_jitter_ms]`.
pub fn jitter(config: &PacingConfig) -> Duration {
    let low = config.min_jitter_ms.min(config.max_jitter_ms);
    let high = config.min_jitter_ms.max(config.max_jitter_ms);
    Duration::from_millis(fastrand::u64(low..=high))
}

/// Spacing plus jitter: the delay before the next navigation.
pub fn next_navigation_delay(config: &PacingConfig, elapsed_secs: f64) -> Duration {
    min_spacing(config, elapsed_secs) + jitter(config)
}

/// Paces request starts for one run.
///
/// Slots are handed out in arrival order, each one `min_spacing` after the
/// previous. A governor token bucket at the host ceiling sits behind the
/// ramp so a misconfigured ramp cannot exceed it.
pub struct Pacer {
    config: PacingConfig,
    started: Instant,
    next_slot: Mutex<Instant>,
    ceiling: Option<DefaultDirectRateLimiter>,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        let config = config.normalized();
        let ceiling = ceiling_limiter(config.max_rate_per_sec);
        if ceiling.is_none() {
            warn!("⚠️ Invalid host ceiling {} req/s, relying on ramp spacing only", config.max_rate_per_sec);
        }
        let now = Instant::now();
        Self {
            config,
            started: now,
            next_slot: Mutex::new(now),
            ceiling,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current target rate
    pub fn current_rate(&self) -> f64 {
        target_rate(&self.config, self.elapsed().as_secs_f64())
    }

    /// Wait until this caller may start a request.
    pub async fn wait_turn(&self) {
        let spacing = min_spacing(&self.config, self.elapsed().as_secs_f64());
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + spacing;
            slot
        };
        sleep_until(slot).await;

        if let Some(limiter) = &self.ceiling {
            limiter.until_ready().await;
        }

        let jitter = jitter(&self.config);
        if !jitter.is_zero() {
            sleep(jitter).await;
        }
        debug!("🎫 Pacing slot granted (spacing {:?}, jitter {:?})", spacing, jitter);
    }
}

fn ceiling_limiter(max_rate_per_sec: f64) -> Option<DefaultDirectRateLimiter> {
    if !max_rate_per_sec.is_finite() || max_rate_per_sec <= 0.0 {
        return None;
    }
    let period = Duration::from_secs_f64(1.0 / max_rate_per_sec);
    let quota = Quota::with_period(period)?.allow_burst(NonZeroU32::MIN);
    Some(RateLimiter::direct(quota))
}
