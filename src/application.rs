//! Application layer module
//!
//! Wires configuration, adapters and the crawling engine into site runs.

pub mod crawl_service;
pub mod export;
pub mod seeds;
pub mod site_adapter;

pub use crawl_service::{CrawlService, CrawlServices, SiteRunSummary, select_targets};
pub use site_adapter::ConfiguredSiteAdapter;
