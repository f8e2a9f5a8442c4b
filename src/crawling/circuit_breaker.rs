//! Cooldown circuit breaker
//!
//! Counts consecutive failed URLs. Once the count reaches the threshold,
//! admission of new URLs is suspended until `cooldown` has passed since the
//! tripping failure; then the counter resets.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_errors: u32,
    consecutive_successes: u32,
    tripped_at: Option<Instant>,
    trips: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// `threshold == 0` disables the breaker.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until new work may start. Returns how long the caller waited.
    pub async fn admit(&self) -> Duration {
        let Some(tripped_at) = self.lock().tripped_at else {
            return Duration::ZERO;
        };

        let started = Instant::now();
        sleep_until(tripped_at + self.cooldown).await;

        let mut state = self.lock();
        if state.tripped_at == Some(tripped_at) {
            state.tripped_at = None;
            state.consecutive_errors = 0;
            info!("🟢 Cooldown finished after {:?}, resuming admissions", self.cooldown);
        }
        started.elapsed()
    }

    /// Record a URL that failed for good. Returns `true` if this failure
    /// tripped the breaker.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.consecutive_errors += 1;
        state.consecutive_successes = 0;

        if self.threshold > 0 && state.consecutive_errors >= self.threshold && state.tripped_at.is_none() {
            state.tripped_at = Some(Instant::now());
            state.trips += 1;
            warn!(
                "🛑 {} consecutive failures, pausing admissions for {:?}",
                state.consecutive_errors, self.cooldown
            );
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_errors = 0;
        state.consecutive_successes += 1;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.lock().consecutive_successes
    }

    /// How many times the breaker tripped during this run
    pub fn trips(&self) -> u32 {
        self.lock().trips
    }

    pub fn is_open(&self) -> bool {
        self.lock().tripped_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sixth_admission_waits_for_cooldown() {
        let cooldown = Duration::from_secs(30);
        let breaker = CircuitBreaker::new(5, cooldown);

        for i in 0..5 {
            assert_eq!(breaker.admit().await, Duration::ZERO);
            let tripped = breaker.record_failure();
            assert_eq!(tripped, i == 4);
        }
        let fifth_failure = Instant::now();

        breaker.admit().await;
        assert!(fifth_failure.elapsed() >= cooldown);
        assert_eq!(breaker.consecutive_errors(), 0);
        assert!(!breaker.is_open());
        assert_eq!(breaker.trips(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
        assert_eq!(breaker.consecutive_errors(), 1);
        assert_eq!(breaker.consecutive_successes(), 0);
        assert_eq!(breaker.admit().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_threshold_never_trips() {
        let breaker = CircuitBreaker::new(0, Duration::from_secs(10));
        for _ in 0..20 {
            assert!(!breaker.record_failure());
        }
        assert_eq!(breaker.admit().await, Duration::ZERO);
    }
}
