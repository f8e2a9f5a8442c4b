//! # Crawling Module
//!
//! 크롤링 오케스트레이션 엔진
//! - 사이트맵 기반 URL 탐색 (discovery)
//! - 시간에 따라 변하는 요청 속도 제어 (pacing)
//! - 재시도 / 백오프 / 서킷 브레이커
//! - 제품 중복 제거 저장소와 단일 writer Actor
//!
//! Every site run gets its own runner state; nothing in this module is
//! shared between sites except the repository behind the store actor.

use thiserror::Error;

pub mod circuit_breaker;
pub mod discovery;
pub mod pacing;
pub mod progress;
pub mod retry_policy;
pub mod runner;
pub mod store;
pub mod store_actor;

pub use circuit_breaker::CircuitBreaker;
pub use discovery::{DiscoveredUrls, SitemapDiscovery, SitemapParser};
pub use pacing::{Pacer, next_navigation_delay, target_rate};
pub use retry_policy::{BackoffPolicy, parse_retry_after};
pub use runner::{CrawlRunner, CrawlTarget, RunLimits, RunOutcome};
pub use store::{ProductStore, StoreOptions, UpsertOutcome};
pub use store_actor::{StoreActor, StoreHandle, UpsertReport};

/// 실행 에러 - errors that end a site run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Store actor is no longer running")]
    StoreUnavailable,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// 사이트맵 에러 - never fatal, a failing sitemap is skipped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Sitemap fetch failed: {0}")]
    Fetch(String),

    #[error("Document is neither a sitemap index nor a urlset")]
    UnrecognizedDocument,

    #[error("Invalid sitemap pattern: {0}")]
    Pattern(String),
}

impl From<DiscoveryError> for RunError {
    fn from(e: DiscoveryError) -> Self {
        Self::Configuration(e.to_string())
    }
}
