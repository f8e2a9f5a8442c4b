//! # Crawl Runner
//!
//! 사이트 하나에 대한 크롤링 실행 엔진.
//!
//! Takes the URL list of one site and drives every URL to `SUCCESS` or
//! `FAILED`: bounded concurrency, pacing, retry with backoff, the cooldown
//! breaker and batched persistence through the store actor. Per-URL
//! failures stay inside the per-URL task; only store errors end the run.

use futures::stream::{self, TryStreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::RunError;
use crate::crawling::circuit_breaker::CircuitBreaker;
use crate::crawling::pacing::Pacer;
use crate::crawling::progress::ProgressReporter;
use crate::crawling::retry_policy::BackoffPolicy;
use crate::crawling::store_actor::StoreHandle;
use crate::domain::constants::runner as runner_defaults;
use crate::domain::page::{FetchError, FetchedPage, PageFetcher};
use crate::domain::product::Product;
use crate::domain::site::{Extraction, ProductExtractor, SiteAdapter};

/// Engine-wide limits, independent of what an adapter declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub concurrency_hard_cap: usize,
    /// Flush the store every N successes (0 = only at the end)
    pub flush_every: usize,
    /// Log progress every M successes (0 disables)
    pub progress_every: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            concurrency_hard_cap: runner_defaults::HARD_CONCURRENCY_CAP,
            flush_every: runner_defaults::FLUSH_EVERY,
            progress_every: runner_defaults::PROGRESS_EVERY,
        }
    }
}

/// One URL to crawl plus the sitemap `lastmod` it was discovered with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    pub url: String,
    pub lastmod: Option<String>,
}

impl CrawlTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lastmod: None,
        }
    }
}

/// Counters of a finished run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub ok: usize,
    pub failed: usize,
    /// Site records persisted across all flushes
    pub written: usize,
    /// URLs that reached a terminal state
    pub visited: usize,
    pub price_updates: usize,
    pub elapsed: Duration,
    /// Shutdown was requested before every URL was admitted
    pub cancelled: bool,
}

#[derive(Default)]
struct Counters {
    ok: AtomicUsize,
    failed: AtomicUsize,
    written: AtomicUsize,
    price_updates: AtomicUsize,
}

/// Terminal state of one URL's attempt loop
enum UrlResult {
    Fetched(Product),
    Failed { attempts: u32, error: FetchError },
    Cancelled,
}

/// Per-run state shared by all in-flight URL tasks of one site
struct RunContext<'a> {
    adapter: &'a dyn SiteAdapter,
    store: &'a StoreHandle,
    limits: &'a RunLimits,
    pacer: Pacer,
    breaker: CircuitBreaker,
    backoff: BackoffPolicy,
    progress: ProgressReporter,
    counters: Counters,
}

pub struct CrawlRunner {
    fetcher: Arc<dyn PageFetcher>,
    standard_extractor: Arc<dyn ProductExtractor>,
    cancel: CancellationToken,
}

impl CrawlRunner {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        standard_extractor: Arc<dyn ProductExtractor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            standard_extractor,
            cancel,
        }
    }

    /// Crawl `targets` for `adapter`, feeding successes into `store`.
    pub async fn run(
        &self,
        targets: Vec<CrawlTarget>,
        adapter: &dyn SiteAdapter,
        store: &StoreHandle,
        limits: &RunLimits,
    ) -> Result<RunOutcome, RunError> {
        let site = adapter.identity();
        if targets.is_empty() {
            info!("📭 [{}] Nothing to crawl", site.key);
            return Ok(RunOutcome::default());
        }

        let started = Instant::now();
        let profile = adapter.pacing();
        let concurrency = profile.concurrency.clamp(1, limits.concurrency_hard_cap.max(1));
        info!(
            "🚀 [{}] Crawling {} URLs (concurrency {}, capabilities {:?})",
            site.key,
            targets.len(),
            concurrency,
            adapter.capabilities()
        );

        let ctx = RunContext {
            adapter,
            store,
            limits,
            pacer: Pacer::new(profile.rate.clone()),
            breaker: CircuitBreaker::new(profile.error_threshold, profile.cooldown()),
            backoff: BackoffPolicy::from_profile(profile),
            progress: ProgressReporter::new(site.key.clone(), targets.len(), limits.progress_every),
            counters: Counters::default(),
        };

        stream::iter(targets.into_iter().map(Ok::<CrawlTarget, RunError>))
            .try_for_each_concurrent(concurrency, |target| {
                let ctx = &ctx;
                async move { self.process(ctx, target).await }
            })
            .await?;

        let flushed = store.flush().await?;
        ctx.counters.written.fetch_add(flushed, Ordering::Relaxed);

        let ok = ctx.counters.ok.load(Ordering::Relaxed);
        let failed = ctx.counters.failed.load(Ordering::Relaxed);
        Ok(RunOutcome {
            ok,
            failed,
            written: ctx.counters.written.load(Ordering::Relaxed),
            visited: ok + failed,
            price_updates: ctx.counters.price_updates.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            cancelled: self.cancel.is_cancelled(),
        })
    }

    /// Admission, fetch loop and bookkeeping for one URL
    async fn process(&self, ctx: &RunContext<'_>, target: CrawlTarget) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        tokio::select! {
            waited = ctx.breaker.admit() => {
                if !waited.is_zero() {
                    debug!("⏸️ {} admitted after cooldown of {:?}", target.url, waited);
                }
            }
            () = self.cancel.cancelled() => return Ok(()),
        }

        match self.fetch_with_retries(ctx, &target.url).await {
            UrlResult::Fetched(product) => {
                ctx.breaker.record_success();
                let report = ctx.store.upsert(product, target.lastmod).await?;

                let ok = ctx.counters.ok.fetch_add(1, Ordering::Relaxed) + 1;
                if report.price_changed {
                    ctx.counters.price_updates.fetch_add(1, Ordering::Relaxed);
                }
                ctx.progress.record_success();

                if ctx.limits.flush_every > 0 && ok % ctx.limits.flush_every == 0 {
                    let flushed = ctx.store.flush().await?;
                    ctx.counters.written.fetch_add(flushed, Ordering::Relaxed);
                }
            }
            UrlResult::Failed { attempts, error } => {
                warn!(
                    "⚠️ [{}] {} failed after {} attempt(s): {}",
                    ctx.adapter.identity().key,
                    target.url,
                    attempts,
                    error
                );
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                ctx.breaker.record_failure();
            }
            // 종료 요청으로 포기한 URL은 실패로 세지 않는다
            UrlResult::Cancelled => {
                debug!("🛑 [{}] {} abandoned on shutdown", ctx.adapter.identity().key, target.url);
            }
        }
        Ok(())
    }

    /// Up to `max_retries + 1` attempts. Pacing and backoff waits end early
    /// when shutdown is requested; an attempt already in flight is not cut.
    async fn fetch_with_retries(&self, ctx: &RunContext<'_>, url: &str) -> UrlResult {
        let max_retries = ctx.adapter.pacing().max_retries;
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return UrlResult::Cancelled,
                () = ctx.pacer.wait_turn() => {}
            }
            let error = match self.attempt(ctx, url).await {
                Ok(product) => return UrlResult::Fetched(product),
                Err(e) => e,
            };
            if attempt >= max_retries {
                return UrlResult::Failed {
                    attempts: attempt + 1,
                    error,
                };
            }

            let hint = if error.is_throttled() { error.retry_after() } else { None };
            let delay = ctx.backoff.delay_with_hint(attempt, hint);
            debug!("🔁 {} attempt {} failed ({}), retrying in {:?}", url, attempt + 1, error, delay);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return UrlResult::Cancelled,
                () = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(&self, ctx: &RunContext<'_>, url: &str) -> Result<Product, FetchError> {
        let adapter = ctx.adapter;
        let navigation = adapter.pacing().navigation();

        let page = timeout(navigation.timeout, self.fetcher.fetch_page(url, &navigation))
            .await
            .map_err(|_| FetchError::Timeout(navigation.timeout))??;
        if !page.is_success() {
            return Err(FetchError::Http {
                status: page.status,
                retry_after: page.retry_after,
            });
        }

        if let Some(consent) = adapter.consent() {
            if let Err(e) = consent.dismiss(&page).await {
                debug!("🍪 Consent dismissal failed on {}: {}", url, e);
            }
        }

        let mut product = self.extract(adapter, &page)?;
        product.url = adapter.url_normalizer().normalize(url);
        if product.currency.is_none() {
            product.currency = adapter.default_currency().map(str::to_string);
        }
        if product.is_empty() {
            return Err(FetchError::Extraction("no product facts on page".into()));
        }
        Ok(product)
    }

    fn extract(&self, adapter: &dyn SiteAdapter, page: &FetchedPage) -> Result<Product, FetchError> {
        match adapter.extraction() {
            Extraction::Custom(extractor) => extractor.extract(page),
            Extraction::Standard { adjuster } => {
                let mut product = self.standard_extractor.extract(page)?;
                if let Some(adjuster) = adjuster {
                    adjuster.adjust(page, &mut product);
                }
                Ok(product)
            }
        }
    }
}
