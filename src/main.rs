//! Catalog Crawler entry point
//!
//! Loads configuration, opens the database and runs every selected site
//! concurrently. Ctrl-C stops admission of new URLs; in-flight work gets
//! `runner.shutdown_timeout_secs` to finish before the process gives up.

use anyhow::{Result, anyhow};
use chrono::{Offset, Utc};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use catalog_crawler::application::{ConfiguredSiteAdapter, CrawlService, CrawlServices};
use catalog_crawler::domain::SiteAdapter;
use catalog_crawler::infrastructure::database_paths::resolve_database_url;
use catalog_crawler::infrastructure::{
    AppConfig, DatabaseConnection, HttpClient, SqliteProductRepository, StandardProductExtractor, init_logging,
};

/// Path of an explicit configuration file, layered over `config/default`
const CONFIG_PATH_ENV: &str = "CATALOG_CRAWLER_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    let offset = config.store.offset().unwrap_or_else(|| Utc.fix());
    init_logging(&config.logging, offset)?;
    info!("🚀 Catalog Crawler v{} starting", env!("CARGO_PKG_VERSION"));

    let database_url = resolve_database_url(&config.database).await?;
    let db = DatabaseConnection::new(&database_url).await?;
    db.migrate().await?;

    let http = Arc::new(HttpClient::with_config(&config.http)?);
    let services = CrawlServices {
        text_fetcher: http.clone(),
        page_fetcher: http,
        extractor: Arc::new(StandardProductExtractor::new()?),
        repository: Arc::new(SqliteProductRepository::new(db.pool().clone())),
    };

    let adapters = config
        .selected_sites()?
        .into_iter()
        .map(ConfiguredSiteAdapter::from_config)
        .collect::<Result<Vec<_>, _>>()?;
    if adapters.is_empty() {
        warn!("⚠️ No sites configured, nothing to do");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let service = CrawlService::new(services, &config, cancel.clone());
    let runs = join_all(adapters.iter().map(|adapter| service.run_site(adapter, &config.run)));
    tokio::pin!(runs);

    let results = tokio::select! {
        results = &mut runs => results,
        Ok(()) = tokio::signal::ctrl_c() => {
            let grace = Duration::from_secs(config.runner.shutdown_timeout_secs);
            warn!("🛑 Shutdown requested, waiting up to {:?} for in-flight URLs", grace);
            cancel.cancel();
            match tokio::time::timeout(grace, &mut runs).await {
                Ok(results) => results,
                Err(_) => {
                    error!("⏱️ Shutdown timed out after {:?}", grace);
                    return Err(anyhow!("shutdown timed out after {grace:?}"));
                }
            }
        }
    };

    let mut failed_sites = 0;
    for (adapter, result) in adapters.iter().zip(results) {
        if let Err(e) = result {
            failed_sites += 1;
            error!("❌ [{}] Site run failed: {:#}", adapter.identity().key, e);
        }
    }

    if failed_sites > 0 {
        return Err(anyhow!("{failed_sites} of {} site runs failed", adapters.len()));
    }
    info!("🏁 All site runs finished");
    Ok(())
}
