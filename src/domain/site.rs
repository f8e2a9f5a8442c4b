//! 사이트 어댑터 인터페이스
//!
//! A site adapter describes one target shop: who it is, where its sitemaps
//! live, how fast it may be crawled and how product facts are pulled out of
//! its pages. Optional behavior is expressed through [`Extraction`] and
//! [`SiteAdapter::consent`] so the runner dispatches over a closed set of
//! variants instead of probing for methods.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::constants::{pacing, retry};
use crate::domain::page::{FetchError, FetchedPage, NavigationOptions, WaitStrategy};
use crate::domain::product::Product;
use crate::domain::product_url::{DEFAULT_NORMALIZER, UrlNormalizer};

/// Who the site is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteIdentity {
    pub key: String,
    pub display_name: String,
    pub base_host: String,
}

/// Predicate deciding whether a sitemap URL is a product page
#[derive(Debug, Clone, Default)]
pub enum ProductUrlFilter {
    #[default]
    Any,
    Pattern(Regex),
}

impl ProductUrlFilter {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Pattern(re) => re.is_match(url),
        }
    }
}

/// Where discovery starts for a site
#[derive(Debug, Clone, Default)]
pub struct DiscoveryProfile {
    pub sitemaps: Vec<String>,
    pub product_filter: ProductUrlFilter,
    /// Also read `Sitemap:` lines from `robots.txt`
    pub use_robots: bool,
}

/// One step of the warm-up curve: from `after_secs` on, crawl at `rate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampStep {
    pub after_secs: f64,
    pub rate: f64,
}

/// Rate parameters consumed by the pacing controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Warm-up schedule, ascending by `after_secs`
    pub ramp: Vec<RampStep>,
    /// Hard host ceiling (requests per second)
    pub max_rate_per_sec: f64,
    pub min_spacing_ms: u64,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            ramp: Vec::new(),
            max_rate_per_sec: pacing::MAX_RATE_PER_SEC,
            min_spacing_ms: pacing::MIN_SPACING_MS,
            min_jitter_ms: pacing::MIN_JITTER_MS,
            max_jitter_ms: pacing::MAX_JITTER_MS,
        }
    }
}

impl PacingConfig {
    /// Same config with the ramp sorted ascending by threshold
    pub fn normalized(mut self) -> Self {
        self.ramp.sort_by(|a, b| a.after_secs.total_cmp(&b.after_secs));
        self
    }
}

/// Everything the runner needs to know about how hard it may push a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingProfile {
    pub concurrency: usize,
    pub navigation_timeout_ms: u64,
    pub wait: WaitStrategy,
    #[serde(flatten)]
    pub rate: PacingConfig,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    /// Consecutive failed URLs before the cooldown kicks in (0 disables)
    pub error_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for PacingProfile {
    fn default() -> Self {
        Self {
            concurrency: pacing::CONCURRENCY,
            navigation_timeout_ms: pacing::NAVIGATION_TIMEOUT_MS,
            wait: WaitStrategy::default(),
            rate: PacingConfig::default(),
            max_retries: retry::MAX_RETRIES,
            retry_base_delay_ms: retry::BASE_DELAY_MS,
            retry_max_delay_ms: retry::MAX_DELAY_MS,
            retry_jitter_ms: retry::JITTER_MS,
            error_threshold: retry::ERROR_THRESHOLD,
            cooldown_ms: retry::COOLDOWN_MS,
        }
    }
}

impl PacingProfile {
    pub const fn navigation(&self) -> NavigationOptions {
        NavigationOptions {
            timeout: Duration::from_millis(self.navigation_timeout_ms),
            wait: self.wait,
        }
    }

    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Full custom extraction for sites the standard extractor cannot handle
pub trait ProductExtractor: Send + Sync {
    fn extract(&self, page: &FetchedPage) -> Result<Product, FetchError>;
}

/// Post-processing applied to the standard extractor's output
pub trait ProductAdjuster: Send + Sync {
    fn adjust(&self, page: &FetchedPage, product: &mut Product);
}

/// Best-effort cookie / consent banner dismissal. Errors are logged and
/// otherwise ignored.
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    async fn dismiss(&self, page: &FetchedPage) -> anyhow::Result<()>;
}

/// How product facts are obtained for a site
pub enum Extraction<'a> {
    Custom(&'a dyn ProductExtractor),
    Standard {
        adjuster: Option<&'a dyn ProductAdjuster>,
    },
}

/// Capability markers, mostly for logging at run start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub custom_extractor: bool,
    pub consent_handler: bool,
    pub fastpath_adjuster: bool,
}

pub trait SiteAdapter: Send + Sync {
    fn identity(&self) -> &SiteIdentity;

    fn discovery(&self) -> &DiscoveryProfile;

    fn pacing(&self) -> &PacingProfile;

    fn extraction(&self) -> Extraction<'_>;

    fn consent(&self) -> Option<&dyn ConsentHandler> {
        None
    }

    fn url_normalizer(&self) -> &UrlNormalizer {
        &DEFAULT_NORMALIZER
    }

    /// Currency applied when a page does not state one
    fn default_currency(&self) -> Option<&str> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        let (custom_extractor, fastpath_adjuster) = match self.extraction() {
            Extraction::Custom(_) => (true, false),
            Extraction::Standard { adjuster } => (false, adjuster.is_some()),
        };
        Capabilities {
            custom_extractor,
            consent_handler: self.consent().is_some(),
            fastpath_adjuster,
        }
    }
}
