//! Catalog Crawler - multi-site e-commerce catalog crawling engine
//!
//! Discovers product URLs from sitemaps, crawls them under per-host pacing
//! with retries and a cooldown breaker, and merges the extracted facts into
//! deduplicated, change-tracked product records.

// Module declarations
pub mod application;
pub mod crawling;
pub mod domain;
pub mod infrastructure;
