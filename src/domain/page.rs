//! Transport collaborators: what the runner and discovery need from the
//! network layer, independent of whether pages come from plain HTTP or a
//! headless browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// How long a navigation waits before the page counts as loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    #[default]
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// Per-navigation options derived from the site's pacing profile
#[derive(Debug, Clone, Copy)]
pub struct NavigationOptions {
    pub timeout: Duration,
    pub wait: WaitStrategy,
}

/// A fetched product page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, if any
    pub retry_after: Option<Duration>,
}

impl FetchedPage {
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure of one fetch/extract attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP error {status}")]
    Http {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Extraction error: {0}")]
    Extraction(String),
}

impl FetchError {
    /// 429 / 503: the site asks us to slow down
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::Http { status: 429 | 503, .. })
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Page transport used by the runner. One call is one attempt; the runner
/// owns retries.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, options: &NavigationOptions) -> Result<FetchedPage, FetchError>;
}

/// Text transport used by sitemap discovery. Implementations retry on their
/// own and fail only once retries are exhausted.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> anyhow::Result<String>;
}
