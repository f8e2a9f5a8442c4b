//! 크롤링 도메인 상수들
//!
//! Default values shared by the pacing controller, the runner and the
//! product store. Configuration files override every one of these.

/// 페이싱(요청 속도) 기본값
pub mod pacing {
    /// Hard per-host ceiling in requests per second
    pub const MAX_RATE_PER_SEC: f64 = 2.0;

    /// Minimum spacing between two navigations (milliseconds)
    pub const MIN_SPACING_MS: u64 = 250;

    /// Lower bound of the random jitter added to every navigation (milliseconds)
    pub const MIN_JITTER_MS: u64 = 0;

    /// Upper bound of the random jitter added to every navigation (milliseconds)
    pub const MAX_JITTER_MS: u64 = 250;

    /// Adapter-declared concurrency when nothing is configured
    pub const CONCURRENCY: usize = 4;

    /// Navigation timeout (milliseconds)
    pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
}

/// 재시도 및 서킷 브레이커 기본값
pub mod retry {
    /// Retries after the first attempt (so `MAX_RETRIES + 1` attempts in total)
    pub const MAX_RETRIES: u32 = 2;

    /// Base delay of the exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Upper bound of a single backoff sleep (milliseconds)
    pub const MAX_DELAY_MS: u64 = 60_000;

    /// Random jitter added to each backoff (milliseconds)
    pub const JITTER_MS: u64 = 250;

    /// Consecutive URL failures that trip the circuit breaker
    pub const ERROR_THRESHOLD: u32 = 5;

    /// Cooldown once the breaker has tripped (milliseconds)
    pub const COOLDOWN_MS: u64 = 60_000;
}

/// 실행 엔진 기본값
pub mod runner {
    /// Concurrency cap that applies regardless of what an adapter declares
    pub const HARD_CONCURRENCY_CAP: usize = 16;

    /// Successful items between two persistence flushes
    pub const FLUSH_EVERY: usize = 50;

    /// Successful items between two progress reports (0 disables)
    pub const PROGRESS_EVERY: usize = 100;

    /// Whole discovery passes attempted before giving up
    pub const DISCOVERY_ATTEMPTS: u32 = 2;

    /// Delay between two discovery passes (milliseconds)
    pub const DISCOVERY_RETRY_DELAY_MS: u64 = 5_000;

    /// Maximum sitemap documents fetched in one discovery pass
    pub const MAX_SITEMAPS: usize = 500;

    /// Seconds the process waits for in-flight work after Ctrl-C
    pub const SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
}

/// 제품 저장소 기본값
pub mod store {
    /// Fixed UTC offset of every stored timestamp (KST, UTC+9)
    pub const UTC_OFFSET_SECONDS: i32 = 9 * 3600;
}
