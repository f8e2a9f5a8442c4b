//! 메모리 기반 저장소 - test double with failure injection

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::domain::product::ProductRecord;
use crate::domain::repositories::{ProductRepository, StoreScope};

#[derive(Default)]
pub struct InMemoryProductRepository {
    records: Mutex<BTreeMap<(StoreScope, String), ProductRecord>>,
    failing_scopes: Mutex<BTreeSet<StoreScope>>,
    batches: AtomicUsize,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following save fail
    pub fn fail_saves(&self, fail: bool) {
        for scope in [StoreScope::Site, StoreScope::Global] {
            self.fail_scope(scope, fail);
        }
    }

    /// Make saves touching `scope` fail
    pub fn fail_scope(&self, scope: StoreScope, fail: bool) {
        let mut failing = self.failing_scopes.lock().unwrap_or_else(PoisonError::into_inner);
        if fail {
            failing.insert(scope);
        } else {
            failing.remove(&scope);
        }
    }

    /// Number of successfully committed `save_batches` calls
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// All records of `scope`, ordered by id
    pub fn records(&self, scope: StoreScope) -> Vec<ProductRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((s, _), _)| *s == scope)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn save_batches(&self, batches: &[(StoreScope, &[ProductRecord])]) -> Result<()> {
        {
            let failing = self.failing_scopes.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((scope, _)) = batches.iter().find(|(scope, _)| failing.contains(scope)) {
                bail!("simulated storage failure on {scope} scope");
            }
        }
        let mut stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for (scope, records) in batches {
            for record in records.iter() {
                stored.insert((*scope, record.id.clone()), record.clone());
            }
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_by_host(&self, scope: StoreScope, host: &str) -> Result<Vec<ProductRecord>> {
        Ok(self
            .records(scope)
            .into_iter()
            .filter(|record| record.host == host)
            .collect())
    }
}
