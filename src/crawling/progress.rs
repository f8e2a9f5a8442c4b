//! 진행 상황 리포터
//!
//! Logs elapsed time, ETA and throughput every `every` successes.
//! Purely a side effect: nothing here feeds back into the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Point-in-time progress figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub done: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Successes per second so far
    pub rate: f64,
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn compute(done: usize, total: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { done as f64 / secs } else { 0.0 };
        let remaining = total.saturating_sub(done);
        let eta = (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate));
        Self {
            done,
            total,
            elapsed,
            rate,
            eta,
        }
    }
}

pub struct ProgressReporter {
    site_key: String,
    total: usize,
    every: usize,
    started: Instant,
    successes: AtomicUsize,
}

impl ProgressReporter {
    /// `every == 0` disables reporting.
    pub fn new(site_key: impl Into<String>, total: usize, every: usize) -> Self {
        Self {
            site_key: site_key.into(),
            total,
            every,
            started: Instant::now(),
            successes: AtomicUsize::new(0),
        }
    }

    /// Count one success. Returns the snapshot that was logged, if any.
    pub fn record_success(&self) -> Option<ProgressSnapshot> {
        let done = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every == 0 || done % self.every != 0 {
            return None;
        }

        let snapshot = ProgressSnapshot::compute(done, self.total, self.started.elapsed());
        info!(
            "📊 [{}] {}/{} ok, elapsed {:.0}s, {:.2}/s, ETA {}",
            self.site_key,
            snapshot.done,
            snapshot.total,
            snapshot.elapsed.as_secs_f64(),
            snapshot.rate,
            snapshot
                .eta
                .map_or_else(|| "unknown".to_string(), |eta| format!("{:.0}s", eta.as_secs_f64()))
        );
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_follows_current_throughput() {
        let snapshot = ProgressSnapshot::compute(50, 150, Duration::from_secs(100));
        assert!((snapshot.rate - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.eta, Some(Duration::from_secs(200)));
    }

    #[test]
    fn no_eta_without_throughput() {
        let snapshot = ProgressSnapshot::compute(0, 10, Duration::ZERO);
        assert_eq!(snapshot.eta, None);
    }

    #[tokio::test]
    async fn reports_every_m_successes() {
        let reporter = ProgressReporter::new("shop", 10, 3);
        let reported: Vec<bool> = (0..7).map(|_| reporter.record_success().is_some()).collect();
        assert_eq!(reported, vec![false, false, true, false, false, true, false]);

        let silent = ProgressReporter::new("shop", 10, 0);
        assert!((0..5).all(|_| silent.record_success().is_none()));
    }
}
