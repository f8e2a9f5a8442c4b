//! StoreActor: 제품 저장소 단일 writer Actor
//!
//! 모든 upsert / flush 요청은 하나의 mpsc 채널을 통해 직렬화된다.
//! Two in-flight URLs that resolve to the same id therefore never race on
//! the merge step: the actor applies commands strictly one after another.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::crawling::RunError;
use crate::crawling::store::{ProductStore, StoreOptions};
use crate::domain::product::{Product, ProductRecord};
use crate::domain::repositories::{ProductRepository, StoreScope};

const COMMAND_BUFFER: usize = 256;

/// Store commands accepted by the actor
#[derive(Debug)]
pub enum StoreCommand {
    Upsert {
        product: Product,
        lastmod: Option<String>,
        reply: oneshot::Sender<UpsertReport>,
    },
    Flush {
        reply: oneshot::Sender<Result<usize, RunError>>,
    },
    KnownUrls {
        reply: oneshot::Sender<BTreeMap<String, Option<String>>>,
    },
    Snapshot {
        touched_only: bool,
        reply: oneshot::Sender<Vec<ProductRecord>>,
    },
}

/// What the runner learns from one upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertReport {
    pub id: String,
    pub created: bool,
    pub changed: bool,
    /// Price differs from the one stored before this run started
    pub price_changed: bool,
}

/// Owns the site and global stores of one host for the length of a run.
pub struct StoreActor {
    repository: Arc<dyn ProductRepository>,
    site: ProductStore,
    global: ProductStore,
    /// id -> price as loaded at run start
    baseline_prices: HashMap<String, Option<f64>>,
    written: usize,
}

impl StoreActor {
    /// Load both scopes of `host` from the repository.
    ///
    /// The site scope never tracks history; the global scope does when
    /// `options.track_history` is set.
    pub async fn load(
        repository: Arc<dyn ProductRepository>,
        host: &str,
        options: StoreOptions,
    ) -> Result<Self, RunError> {
        let site_records = repository
            .load_by_host(StoreScope::Site, host)
            .await
            .map_err(|e| RunError::Persistence(format!("loading site records for {host}: {e}")))?;
        let global_records = repository
            .load_by_host(StoreScope::Global, host)
            .await
            .map_err(|e| RunError::Persistence(format!("loading global records for {host}: {e}")))?;

        let baseline_prices = site_records
            .iter()
            .map(|record| (record.id.clone(), record.product.price))
            .collect();

        info!(
            "📦 Loaded {} site / {} global records for {}",
            site_records.len(),
            global_records.len(),
            host
        );

        let site_options = StoreOptions {
            track_history: false,
            ..options.clone()
        };

        Ok(Self {
            repository,
            site: ProductStore::from_records(StoreScope::Site, host, site_records, site_options),
            global: ProductStore::from_records(StoreScope::Global, host, global_records, options),
            baseline_prices,
            written: 0,
        })
    }

    /// Start the apply loop. The loop ends once every [`StoreHandle`] is
    /// dropped; the join handle yields the number of site records written.
    pub fn spawn(self) -> (StoreHandle, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(self.run(rx));
        (StoreHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<StoreCommand>) -> usize {
        debug!("🔄 StoreActor started for {}", self.site.host());
        while let Some(command) = rx.recv().await {
            match command {
                StoreCommand::Upsert { product, lastmod, reply } => {
                    let report = self.upsert(&product, lastmod.as_deref());
                    let _ = reply.send(report);
                }
                StoreCommand::Flush { reply } => {
                    let result = self.flush().await;
                    let _ = reply.send(result);
                }
                StoreCommand::KnownUrls { reply } => {
                    let _ = reply.send(self.site.known_urls());
                }
                StoreCommand::Snapshot { touched_only, reply } => {
                    let _ = reply.send(self.site.snapshot(touched_only));
                }
            }
        }
        debug!("🛑 StoreActor stopped for {} ({} written)", self.site.host(), self.written);
        self.written
    }

    fn upsert(&mut self, product: &Product, lastmod: Option<&str>) -> UpsertReport {
        let now = self.site.now();
        let outcome = self.site.upsert_at(product, lastmod, now);
        self.global.upsert_at(product, lastmod, now);

        let price_changed = match (self.baseline_prices.get(&outcome.record.id), product.price) {
            (Some(before), Some(after)) => *before != Some(after),
            _ => false,
        };

        UpsertReport {
            id: outcome.record.id,
            created: outcome.created,
            changed: outcome.changed,
            price_changed,
        }
    }

    async fn flush(&mut self) -> Result<usize, RunError> {
        let site_batch = self.site.dirty_records();
        let global_batch = self.global.dirty_records();
        if site_batch.is_empty() && global_batch.is_empty() {
            return Ok(0);
        }

        let batches = [
            (StoreScope::Site, site_batch.as_slice()),
            (StoreScope::Global, global_batch.as_slice()),
        ];
        if let Err(e) = self.repository.save_batches(&batches).await {
            error!(
                "❌ Failed to persist {} site / {} global records: {}",
                site_batch.len(),
                global_batch.len(),
                e
            );
            return Err(RunError::Persistence(e.to_string()));
        }
        self.site.mark_clean();
        self.global.mark_clean();

        self.written += site_batch.len();
        debug!("💾 Flushed {} site / {} global records", site_batch.len(), global_batch.len());
        Ok(site_batch.len())
    }
}

/// Cloneable sender side of the store actor
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand) -> Result<T, RunError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RunError::StoreUnavailable)?;
        rx.await.map_err(|_| RunError::StoreUnavailable)
    }

    pub async fn upsert(&self, product: Product, lastmod: Option<String>) -> Result<UpsertReport, RunError> {
        self.request(|reply| StoreCommand::Upsert { product, lastmod, reply })
            .await
    }

    /// Persist dirty records. Returns how many site records were written.
    pub async fn flush(&self) -> Result<usize, RunError> {
        self.request(|reply| StoreCommand::Flush { reply }).await?
    }

    pub async fn known_urls(&self) -> Result<BTreeMap<String, Option<String>>, RunError> {
        self.request(|reply| StoreCommand::KnownUrls { reply }).await
    }

    pub async fn snapshot(&self, touched_only: bool) -> Result<Vec<ProductRecord>, RunError> {
        self.request(|reply| StoreCommand::Snapshot { touched_only, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_repository::InMemoryProductRepository;

    fn widget(url: &str, price: f64) -> Product {
        Product {
            name: Some("Widget".into()),
            price: Some(price),
            gtin: Some("40123455".into()),
            ..Product::new(url)
        }
    }

    #[tokio::test]
    async fn flush_persists_both_scopes() {
        let repo = Arc::new(InMemoryProductRepository::new());
        let actor = StoreActor::load(repo.clone(), "site.test", StoreOptions::default())
            .await
            .unwrap();
        let (handle, join) = actor.spawn();

        let report = handle
            .upsert(widget("https://site.test/p/1", 10.0), None)
            .await
            .unwrap();
        assert!(report.created);
        assert!(!report.price_changed);

        assert_eq!(handle.flush().await.unwrap(), 1);
        assert_eq!(handle.flush().await.unwrap(), 0);
        drop(handle);
        assert_eq!(join.await.unwrap(), 1);

        assert_eq!(repo.records(StoreScope::Site).len(), 1);
        assert_eq!(repo.records(StoreScope::Global).len(), 1);
    }

    #[tokio::test]
    async fn price_change_is_measured_against_run_start() {
        let repo = Arc::new(InMemoryProductRepository::new());
        {
            let actor = StoreActor::load(repo.clone(), "site.test", StoreOptions::default())
                .await
                .unwrap();
            let (handle, _join) = actor.spawn();
            handle.upsert(widget("https://site.test/p/1", 10.0), None).await.unwrap();
            handle.flush().await.unwrap();
        }

        let options = StoreOptions {
            track_history: true,
            ..StoreOptions::default()
        };
        let actor = StoreActor::load(repo.clone(), "site.test", options).await.unwrap();
        let (handle, _join) = actor.spawn();

        let same = handle.upsert(widget("https://site.test/p/1", 10.0), None).await.unwrap();
        assert!(!same.price_changed);
        assert!(!same.changed);

        let cheaper = handle.upsert(widget("https://site.test/p/2", 8.0), None).await.unwrap();
        assert!(cheaper.price_changed);
        assert!(!cheaper.created);
        handle.flush().await.unwrap();

        let global = repo.records(StoreScope::Global);
        assert_eq!(global[0].history.len(), 1);
        assert!(repo.records(StoreScope::Site)[0].history.is_empty());
    }

    #[tokio::test]
    async fn failed_save_surfaces_as_persistence_error() {
        let repo = Arc::new(InMemoryProductRepository::new());
        let actor = StoreActor::load(repo.clone(), "site.test", StoreOptions::default())
            .await
            .unwrap();
        let (handle, _join) = actor.spawn();
        handle.upsert(widget("https://site.test/p/1", 10.0), None).await.unwrap();

        repo.fail_saves(true);
        assert!(matches!(handle.flush().await, Err(RunError::Persistence(_))));
    }

    #[tokio::test]
    async fn failed_global_write_leaves_site_scope_unwritten() {
        let repo = Arc::new(InMemoryProductRepository::new());
        let actor = StoreActor::load(repo.clone(), "site.test", StoreOptions::default())
            .await
            .unwrap();
        let (handle, join) = actor.spawn();
        handle.upsert(widget("https://site.test/p/1", 10.0), None).await.unwrap();

        repo.fail_scope(StoreScope::Global, true);
        assert!(matches!(handle.flush().await, Err(RunError::Persistence(_))));
        assert!(repo.records(StoreScope::Site).is_empty());
        assert!(repo.records(StoreScope::Global).is_empty());

        // 실패한 레코드는 dirty 상태로 남아 다음 flush에서 다시 저장된다
        repo.fail_scope(StoreScope::Global, false);
        assert_eq!(handle.flush().await.unwrap(), 1);
        assert_eq!(repo.records(StoreScope::Site).len(), 1);
        assert_eq!(repo.records(StoreScope::Global).len(), 1);
        drop(handle);
        assert_eq!(join.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn known_urls_include_loaded_records() {
        let repo = Arc::new(InMemoryProductRepository::new());
        {
            let actor = StoreActor::load(repo.clone(), "site.test", StoreOptions::default())
                .await
                .unwrap();
            let (handle, _join) = actor.spawn();
            handle
                .upsert(widget("https://site.test/p/1", 10.0), Some("2024-01-01".into()))
                .await
                .unwrap();
            handle.flush().await.unwrap();
        }

        let actor = StoreActor::load(repo, "site.test", StoreOptions::default())
            .await
            .unwrap();
        let (handle, _join) = actor.spawn();
        let known = handle.known_urls().await.unwrap();
        assert_eq!(known.get("https://site.test/p/1"), Some(&Some("2024-01-01".to_string())));
        assert!(handle.snapshot(true).await.unwrap().is_empty());
        assert_eq!(handle.snapshot(false).await.unwrap().len(), 1);
    }
}
