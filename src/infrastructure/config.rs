//! Configuration infrastructure
//!
//! 설정은 세 단계로 합쳐진다:
//! 1. 코드 기본값 (`defaults` 모듈과 각 구조체의 `Default`)
//! 2. `config/default.{toml,json,yaml}` 파일 (선택)
//! 3. `CATALOG_CRAWLER__` 접두사 환경 변수
//!
//! The resulting [`AppConfig`] is immutable for the life of the process.
//! Per-run knobs live in [`RunConfig`] and are handed to the site service
//! explicitly at call time.

use chrono::FixedOffset;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::constants::{runner as runner_defaults, store as store_defaults};
use crate::domain::product::TrackedField;
use crate::domain::site::PacingProfile;

/// Environment variable prefix, e.g. `CATALOG_CRAWLER__RUN__MODE=delta`
pub const ENV_PREFIX: &str = "CATALOG_CRAWLER";

/// Base configuration file, extension resolved by the `config` crate
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Invalid product URL pattern for site {site}: {message}")]
    InvalidPattern { site: String, message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub runner: RunnerConfig,
    pub run: RunConfig,
    pub sites: Vec<SiteConfig>,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// JSON formatted file logs
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    /// Defaults to `<data dir>/logs`
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: defaults::LOG_JSON_FORMAT,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` URL; the platform data directory is used when unset
    pub url: Option<String>,
}

/// Discovery HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECONDS,
            max_retries: defaults::HTTP_MAX_RETRIES,
            retry_base_delay_ms: defaults::HTTP_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: defaults::HTTP_RETRY_MAX_DELAY_MS,
            retry_jitter_ms: defaults::HTTP_RETRY_JITTER_MS,
        }
    }
}

/// Merge / history behavior of the product store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub track_history: bool,
    pub history_fields: Vec<TrackedField>,
    /// Offset every timestamp is written in (seconds east of UTC)
    pub utc_offset_seconds: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            track_history: true,
            history_fields: TrackedField::HISTORY_DEFAULT.to_vec(),
            utc_offset_seconds: store_defaults::UTC_OFFSET_SECONDS,
        }
    }
}

impl StoreConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_seconds)
    }

    pub fn history_field_set(&self) -> BTreeSet<TrackedField> {
        self.history_fields.iter().copied().collect()
    }
}

/// Engine-wide limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub concurrency_hard_cap: usize,
    pub flush_every: usize,
    pub discovery_attempts: u32,
    pub discovery_retry_delay_ms: u64,
    pub max_sitemaps: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency_hard_cap: runner_defaults::HARD_CONCURRENCY_CAP,
            flush_every: runner_defaults::FLUSH_EVERY,
            discovery_attempts: runner_defaults::DISCOVERY_ATTEMPTS,
            discovery_retry_delay_ms: runner_defaults::DISCOVERY_RETRY_DELAY_MS,
            max_sitemaps: runner_defaults::MAX_SITEMAPS,
            shutdown_timeout_secs: runner_defaults::SHUTDOWN_TIMEOUT_SECONDS,
        }
    }
}

/// Which URLs a run visits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every discovered URL
    #[default]
    Full,
    /// Unknown URLs and URLs whose sitemap `lastmod` moved
    Delta,
    /// Every URL already in the store, no discovery
    Refresh,
}

/// Per-run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,
    /// Maximum number of product URLs per site (0 = unlimited)
    pub limit: usize,
    /// Progress line every N successes (0 disables)
    pub progress_every: usize,
    /// One URL per line, `#` starts a comment
    pub seed_file: Option<PathBuf>,
    pub seed_urls: Vec<String>,
    /// Crawl only the seeds, skip discovery
    pub seed_only: bool,
    /// site key -> comma separated sitemap URLs replacing the configured ones
    pub sitemap_override: HashMap<String, String>,
    /// Extra sitemaps, each used only by the site whose host it points at
    pub extra_sitemaps: Vec<String>,
    /// Export only records visited in this run
    pub snapshot_touched_only: bool,
    pub export_dir: Option<PathBuf>,
    /// Site keys to run (empty = all)
    pub sites: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Full,
            limit: 0,
            progress_every: runner_defaults::PROGRESS_EVERY,
            seed_file: None,
            seed_urls: Vec::new(),
            seed_only: false,
            sitemap_override: HashMap::new(),
            extra_sitemaps: Vec::new(),
            snapshot_touched_only: false,
            export_dir: None,
            sites: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Sitemap override for `site_key`, if one is configured
    pub fn sitemap_override_for(&self, site_key: &str) -> Option<Vec<String>> {
        let raw = self.sitemap_override.get(site_key)?;
        let urls: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (!urls.is_empty()).then_some(urls)
    }

    pub const fn limit(&self) -> Option<usize> {
        if self.limit == 0 { None } else { Some(self.limit) }
    }
}

/// Declarative site adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub key: String,
    pub display_name: Option<String>,
    pub base_host: String,
    pub sitemaps: Vec<String>,
    /// Regex a product URL must match; every URL is accepted when unset
    pub product_url_pattern: Option<String>,
    pub use_robots: bool,
    pub default_currency: Option<String>,
    /// Query parameters that identify a product and survive normalization
    pub keep_query: Vec<String>,
    pub pacing: PacingProfile,
}

impl SiteConfig {
    pub fn compiled_pattern(&self) -> Result<Option<Regex>, ConfigError> {
        self.product_url_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    site: self.key.clone(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

impl AppConfig {
    /// Load from `config/default`, an optional explicit file and the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`AppConfig::load`] but with the environment supplied as a
    /// map instead of read from the process.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("run.seed_urls")
                    .with_list_parse_key("run.extra_sitemaps")
                    .with_list_parse_key("run.sites")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정값 유효성 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.offset().is_none() {
            return Err(validation(format!(
                "store.utc_offset_seconds out of range: {}",
                self.store.utc_offset_seconds
            )));
        }
        if self.runner.concurrency_hard_cap == 0 {
            return Err(validation("runner.concurrency_hard_cap must be greater than 0"));
        }

        let mut keys = BTreeSet::new();
        for site in &self.sites {
            if site.key.trim().is_empty() {
                return Err(validation("site key must not be empty"));
            }
            if !keys.insert(site.key.as_str()) {
                return Err(validation(format!("duplicate site key: {}", site.key)));
            }
            if site.base_host.trim().is_empty() {
                return Err(validation(format!("site {} has no base_host", site.key)));
            }
            site.compiled_pattern()?;

            let rate = &site.pacing.rate;
            if !rate.max_rate_per_sec.is_finite() || rate.max_rate_per_sec <= 0.0 {
                return Err(validation(format!("site {}: max_rate_per_sec must be positive", site.key)));
            }
            if let Some(step) = rate.ramp.iter().find(|s| !(s.rate > 0.0) || s.after_secs < 0.0) {
                return Err(validation(format!(
                    "site {}: invalid ramp step ({}s, {}/s)",
                    site.key, step.after_secs, step.rate
                )));
            }
            if rate.min_jitter_ms > rate.max_jitter_ms {
                return Err(validation(format!("site {}: min_jitter_ms > max_jitter_ms", site.key)));
            }
            if site.pacing.concurrency == 0 {
                return Err(validation(format!("site {}: concurrency must be at least 1", site.key)));
            }
        }
        Ok(())
    }

    /// Sites selected by `run.sites`, in configuration order
    pub fn selected_sites(&self) -> Result<Vec<&SiteConfig>, ConfigError> {
        if self.run.sites.is_empty() {
            return Ok(self.sites.iter().collect());
        }
        if let Some(unknown) = self
            .run
            .sites
            .iter()
            .find(|key| !self.sites.iter().any(|site| &site.key == *key))
        {
            return Err(ConfigError::UnknownSite(unknown.clone()));
        }
        Ok(self
            .sites
            .iter()
            .filter(|site| self.run.sites.contains(&site.key))
            .collect())
    }
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

/// Default values for configuration
pub mod defaults {
    pub const LOG_LEVEL: &str = "info";
    pub const LOG_JSON_FORMAT: bool = true;
    pub const LOG_FILE_NAME: &str = "catalog-crawler.log";

    /// Desktop browser identity used for sitemap and page requests
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const HTTP_MAX_RETRIES: u32 = 3;
    pub const HTTP_RETRY_BASE_DELAY_MS: u64 = 500;
    pub const HTTP_RETRY_MAX_DELAY_MS: u64 = 10_000;
    pub const HTTP_RETRY_JITTER_MS: u64 = 250;

    pub const APP_DIR_NAME: &str = "catalog-crawler";
    pub const DATABASE_FILE_NAME: &str = "catalog.db";
}
