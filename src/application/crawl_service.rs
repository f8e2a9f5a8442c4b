//! # Site Crawl Service
//!
//! 사이트 하나의 전체 실행 흐름:
//! 저장소 로드 → 시드/사이트맵 탐색 → 실행 모드 필터 → 제한 적용 → 크롤링 → 내보내기
//!
//! Sites are independent: each call builds its own store actor, pacer and
//! breaker. Only the repository and the transports are shared.

use anyhow::{Result, anyhow};
use chrono::{Offset, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::export::{SnapshotExport, write_snapshot};
use crate::application::seeds::{load_seeds, seeds_for_site};
use crate::crawling::discovery::{DiscoveredUrls, SitemapDiscovery};
use crate::crawling::runner::{CrawlRunner, CrawlTarget, RunLimits, RunOutcome};
use crate::crawling::store::StoreOptions;
use crate::crawling::store_actor::{StoreActor, StoreHandle};
use crate::domain::page::{PageFetcher, TextFetcher};
use crate::domain::repositories::ProductRepository;
use crate::domain::site::{ProductExtractor, SiteAdapter};
use crate::infrastructure::config::{AppConfig, RunConfig, RunMode, RunnerConfig, StoreConfig};

/// Collaborators shared by every site run
#[derive(Clone)]
pub struct CrawlServices {
    pub text_fetcher: Arc<dyn TextFetcher>,
    pub page_fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn ProductExtractor>,
    pub repository: Arc<dyn ProductRepository>,
}

/// Summary of one site run
#[derive(Debug, Clone)]
pub struct SiteRunSummary {
    pub site_key: String,
    pub run_id: String,
    pub mode: RunMode,
    /// Product URLs found by discovery (before mode filter and limit)
    pub discovered: usize,
    /// URLs handed to the runner
    pub targets: usize,
    pub outcome: RunOutcome,
    pub export_path: Option<PathBuf>,
}

impl SiteRunSummary {
    pub fn elapsed_secs(&self) -> f64 {
        self.outcome.elapsed.as_secs_f64()
    }
}

pub struct CrawlService {
    services: CrawlServices,
    runner: RunnerConfig,
    store: StoreConfig,
    cancel: CancellationToken,
}

impl CrawlService {
    pub fn new(services: CrawlServices, config: &AppConfig, cancel: CancellationToken) -> Self {
        Self {
            services,
            runner: config.runner.clone(),
            store: config.store.clone(),
            cancel,
        }
    }

    fn store_options(&self, adapter: &dyn SiteAdapter) -> Result<StoreOptions> {
        let offset = self
            .store
            .offset()
            .ok_or_else(|| anyhow!("Invalid UTC offset: {}", self.store.utc_offset_seconds))?;
        Ok(StoreOptions {
            track_history: self.store.track_history,
            history_fields: self.store.history_field_set(),
            offset,
            normalizer: adapter.url_normalizer().clone(),
        })
    }

    /// Run one site from store load to export.
    pub async fn run_site(&self, adapter: &dyn SiteAdapter, run: &RunConfig) -> Result<SiteRunSummary> {
        let identity = adapter.identity();
        let run_id = Uuid::new_v4().to_string();
        info!(
            "🏁 [{}] Run {} started ({:?} mode, host {})",
            identity.key, run_id, run.mode, identity.base_host
        );

        let actor = StoreActor::load(
            Arc::clone(&self.services.repository),
            &identity.base_host,
            self.store_options(adapter)?,
        )
        .await?;
        let (store, actor_task) = actor.spawn();

        let result = self.crawl(adapter, run, &store, &run_id).await;

        drop(store);
        if let Err(e) = actor_task.await {
            warn!("⚠️ [{}] Store actor ended abnormally: {}", identity.key, e);
        }

        let summary = result?;
        info!(
            site = %summary.site_key,
            run_id = %summary.run_id,
            ok = summary.outcome.ok,
            failed = summary.outcome.failed,
            written = summary.outcome.written,
            visited = summary.outcome.visited,
            price_updates = summary.outcome.price_updates,
            elapsed_secs = summary.elapsed_secs(),
            cancelled = summary.outcome.cancelled,
            "✅ Site run finished"
        );
        Ok(summary)
    }

    async fn crawl(
        &self,
        adapter: &dyn SiteAdapter,
        run: &RunConfig,
        store: &StoreHandle,
        run_id: &str,
    ) -> Result<SiteRunSummary> {
        let identity = adapter.identity();
        let normalizer = adapter.url_normalizer();

        let all_seeds = load_seeds(run.seed_file.as_deref(), &run.seed_urls).await?;
        let seeds = seeds_for_site(&all_seeds, &identity.base_host, normalizer);
        if !seeds.is_empty() {
            info!("🌱 [{}] {} seed URLs", identity.key, seeds.len());
        }

        let (discovered, mut candidates) = match run.mode {
            RunMode::Refresh => {
                let known = store.known_urls().await?;
                info!("🔄 [{}] Refreshing {} known URLs", identity.key, known.len());
                (0, known)
            }
            RunMode::Full | RunMode::Delta if run.seed_only => (0, BTreeMap::new()),
            RunMode::Full => {
                let found = self.discover(adapter, run).await?;
                (found.len(), found.urls)
            }
            RunMode::Delta => {
                let found = self.discover(adapter, run).await?;
                let known = store.known_urls().await?;
                let selected = select_targets(&found.urls, &known);
                info!(
                    "🧮 [{}] Delta: {} of {} discovered URLs are new or changed",
                    identity.key,
                    selected.len(),
                    found.len()
                );
                (found.len(), selected)
            }
        };

        for seed in seeds {
            candidates.entry(seed).or_insert(None);
        }

        let mut targets: Vec<CrawlTarget> = candidates
            .into_iter()
            .map(|(url, lastmod)| CrawlTarget { url, lastmod })
            .collect();
        if let Some(limit) = run.limit() {
            if targets.len() > limit {
                info!("✂️ [{}] Limiting run to {} of {} URLs", identity.key, limit, targets.len());
                targets.truncate(limit);
            }
        }
        let target_count = targets.len();

        let limits = RunLimits {
            concurrency_hard_cap: self.runner.concurrency_hard_cap,
            flush_every: self.runner.flush_every,
            progress_every: run.progress_every,
        };
        let runner = CrawlRunner::new(
            Arc::clone(&self.services.page_fetcher),
            Arc::clone(&self.services.extractor),
            self.cancel.clone(),
        );
        let outcome = runner.run(targets, adapter, store, &limits).await?;

        let export_path = match &run.export_dir {
            Some(dir) => {
                let records = store.snapshot(run.snapshot_touched_only).await?;
                let offset = self.store.offset().unwrap_or_else(|| Utc.fix());
                let snapshot = SnapshotExport {
                    site: &identity.key,
                    run_id,
                    exported_at: Utc::now().with_timezone(&offset),
                    touched_only: run.snapshot_touched_only,
                    count: records.len(),
                    records: &records,
                };
                Some(write_snapshot(dir, &snapshot).await?)
            }
            None => None,
        };

        Ok(SiteRunSummary {
            site_key: identity.key.clone(),
            run_id: run_id.to_string(),
            mode: run.mode,
            discovered,
            targets: target_count,
            outcome,
            export_path,
        })
    }

    /// Discovery with whole-pass retries while nothing is found
    async fn discover(&self, adapter: &dyn SiteAdapter, run: &RunConfig) -> Result<DiscoveredUrls> {
        let identity = adapter.identity();
        let profile = adapter.discovery();
        let discovery =
            SitemapDiscovery::new(self.services.text_fetcher.as_ref())?.with_max_sitemaps(self.runner.max_sitemaps);

        let override_list = run.sitemap_override_for(&identity.key);
        let seeds = discovery
            .collect_seeds(
                profile,
                &identity.base_host,
                override_list.as_deref(),
                &run.extra_sitemaps,
            )
            .await;
        if seeds.is_empty() {
            warn!("⚠️ [{}] No sitemap configured, nothing to discover", identity.key);
            return Ok(DiscoveredUrls::default());
        }

        let attempts = self.runner.discovery_attempts.max(1);
        let delay = Duration::from_millis(self.runner.discovery_retry_delay_ms);
        for attempt in 1..=attempts {
            let found = discovery.discover(&seeds, &profile.product_filter, adapter.url_normalizer()).await;
            if !found.is_empty() || attempt == attempts {
                return Ok(found);
            }
            warn!(
                "⚠️ [{}] Discovery attempt {}/{} found no product URLs, retrying in {:?}",
                identity.key, attempt, attempts, delay
            );
            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => break,
            }
        }
        Ok(DiscoveredUrls::default())
    }
}

/// Delta selection: URLs the store has never seen, plus known URLs whose
/// sitemap `lastmod` differs from the stored one. A known URL without a
/// discovered `lastmod` is skipped.
pub fn select_targets(
    discovered: &BTreeMap<String, Option<String>>,
    known: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, Option<String>> {
    discovered
        .iter()
        .filter(|(url, lastmod)| match known.get(*url) {
            None => true,
            Some(stored) => lastmod.is_some() && *lastmod != stored,
        })
        .map(|(url, lastmod)| (url.clone(), lastmod.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::site_adapter::ConfiguredSiteAdapter;
    use crate::domain::page::{FetchError, FetchedPage, NavigationOptions};
    use crate::domain::repositories::StoreScope;
    use crate::infrastructure::config::SiteConfig;
    use crate::infrastructure::html_parser::StandardProductExtractor;
    use crate::infrastructure::memory_repository::InMemoryProductRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeWeb {
        texts: HashMap<String, String>,
        text_calls: AtomicUsize,
        pages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextFetcher for FakeWeb {
        async fn fetch_text(&self, url: &str) -> anyhow::Result<String> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            self.texts
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("404 {url}"))
        }
    }

    #[async_trait]
    impl PageFetcher for FakeWeb {
        async fn fetch_page(&self, url: &str, _options: &NavigationOptions) -> Result<FetchedPage, FetchError> {
            self.pages.lock().unwrap().push(url.to_string());
            let id = url.rsplit('/').next().unwrap_or_default();
            let body = format!(
                r#"<script type="application/ld+json">{{"@type":"Product","name":"Item {id}",
                   "offers":{{"price":"{id}.00","priceCurrency":"EUR"}}}}</script>"#
            );
            Ok(FetchedPage::ok(url, body))
        }
    }

    fn web() -> Arc<FakeWeb> {
        let mut texts = HashMap::new();
        texts.insert(
            "https://shop.test/sitemap.xml".to_string(),
            r#"<sitemapindex><sitemap><loc>/sitemap-products.xml</loc></sitemap></sitemapindex>"#.to_string(),
        );
        texts.insert(
            "https://shop.test/sitemap-products.xml".to_string(),
            r#"<urlset>
                <url><loc>https://shop.test/p/1</loc><lastmod>2024-05-01</lastmod></url>
                <url><loc>https://shop.test/p/2</loc><lastmod>2024-05-01</lastmod></url>
                <url><loc>https://shop.test/about</loc></url>
            </urlset>"#
                .to_string(),
        );
        Arc::new(FakeWeb {
            texts,
            ..FakeWeb::default()
        })
    }

    fn adapter() -> ConfiguredSiteAdapter {
        let mut site = SiteConfig {
            key: "shop".into(),
            base_host: "shop.test".into(),
            sitemaps: vec!["https://shop.test/sitemap.xml".into()],
            product_url_pattern: Some(r"/p/\d+$".into()),
            ..SiteConfig::default()
        };
        site.pacing.rate.max_rate_per_sec = 1000.0;
        site.pacing.rate.min_spacing_ms = 0;
        site.pacing.rate.max_jitter_ms = 0;
        ConfiguredSiteAdapter::from_config(&site).unwrap()
    }

    fn service(web: &Arc<FakeWeb>, repo: &Arc<InMemoryProductRepository>) -> CrawlService {
        let services = CrawlServices {
            text_fetcher: web.clone(),
            page_fetcher: web.clone(),
            extractor: Arc::new(StandardProductExtractor::new().unwrap()),
            repository: repo.clone(),
        };
        let mut config = AppConfig::default();
        config.runner.discovery_retry_delay_ms = 1;
        CrawlService::new(services, &config, CancellationToken::new())
    }

    #[tokio::test]
    async fn full_run_discovers_crawls_and_exports() {
        let web = web();
        let repo = Arc::new(InMemoryProductRepository::new());
        let dir = TempDir::new().unwrap();
        let run = RunConfig {
            export_dir: Some(dir.path().to_path_buf()),
            ..RunConfig::default()
        };

        let summary = service(&web, &repo).run_site(&adapter(), &run).await.unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.outcome.ok, 2);
        assert_eq!(summary.outcome.written, 2);
        assert_eq!(repo.records(StoreScope::Site).len(), 2);
        assert_eq!(repo.records(StoreScope::Global).len(), 2);
        assert!(summary.export_path.unwrap().ends_with("shop.json"));
    }

    #[tokio::test]
    async fn refresh_recrawls_known_urls_without_discovery() {
        let web = web();
        let repo = Arc::new(InMemoryProductRepository::new());
        service(&web, &repo)
            .run_site(&adapter(), &RunConfig::default())
            .await
            .unwrap();
        let calls_after_full = web.text_calls.load(Ordering::SeqCst);

        let run = RunConfig {
            mode: RunMode::Refresh,
            ..RunConfig::default()
        };
        let summary = service(&web, &repo).run_site(&adapter(), &run).await.unwrap();

        assert_eq!(summary.targets, 2);
        assert_eq!(summary.outcome.ok, 2);
        assert_eq!(web.text_calls.load(Ordering::SeqCst), calls_after_full);
    }

    #[tokio::test]
    async fn delta_skips_unchanged_urls() {
        let web = web();
        let repo = Arc::new(InMemoryProductRepository::new());
        service(&web, &repo)
            .run_site(&adapter(), &RunConfig::default())
            .await
            .unwrap();

        let run = RunConfig {
            mode: RunMode::Delta,
            ..RunConfig::default()
        };
        let summary = service(&web, &repo).run_site(&adapter(), &run).await.unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.targets, 0);
        assert_eq!(summary.outcome, RunOutcome::default());
    }

    #[tokio::test]
    async fn seed_only_skips_discovery_and_honors_limit() {
        let web = web();
        let repo = Arc::new(InMemoryProductRepository::new());
        let run = RunConfig {
            seed_only: true,
            seed_urls: vec![
                "https://shop.test/p/7".into(),
                "https://shop.test/p/8/".into(),
                "https://shop.test/p/9".into(),
                "https://elsewhere.test/p/1".into(),
            ],
            limit: 2,
            ..RunConfig::default()
        };

        let summary = service(&web, &repo).run_site(&adapter(), &run).await.unwrap();

        assert_eq!(web.text_calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary.targets, 2);
        assert_eq!(summary.outcome.ok, 2);
        let mut crawled = web.pages.lock().unwrap().clone();
        crawled.sort();
        assert_eq!(crawled, vec!["https://shop.test/p/7".to_string(), "https://shop.test/p/8".to_string()]);
    }

    #[tokio::test]
    async fn empty_discovery_is_an_empty_run() {
        let web = Arc::new(FakeWeb::default());
        let repo = Arc::new(InMemoryProductRepository::new());

        let summary = service(&web, &repo)
            .run_site(&adapter(), &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.discovered, 0);
        assert_eq!(summary.outcome, RunOutcome::default());
        // sitemap fetched once per discovery attempt
        assert_eq!(web.text_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delta_selection_rules() {
        let discovered = BTreeMap::from([
            ("https://shop.test/p/1".to_string(), Some("2024-05-02".to_string())),
            ("https://shop.test/p/2".to_string(), Some("2024-05-01".to_string())),
            ("https://shop.test/p/3".to_string(), None),
            ("https://shop.test/p/4".to_string(), None),
        ]);
        let known = BTreeMap::from([
            ("https://shop.test/p/1".to_string(), Some("2024-05-01".to_string())),
            ("https://shop.test/p/2".to_string(), Some("2024-05-01".to_string())),
            ("https://shop.test/p/3".to_string(), Some("2024-05-01".to_string())),
        ]);

        let selected: Vec<_> = select_targets(&discovered, &known).into_keys().collect();
        assert_eq!(selected, vec!["https://shop.test/p/1", "https://shop.test/p/4"]);
    }
}
