//! Repository interfaces for product records
//!
//! The persistent store keeps records keyed by id, once per site scope and
//! once in the cross-site global scope.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::product::ProductRecord;

/// Which copy of a record is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreScope {
    Site,
    Global,
}

impl StoreScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Idempotent upsert-by-id of several scoped batches in one unit of
    /// work. Either every record of every batch is written or none is.
    async fn save_batches(&self, batches: &[(StoreScope, &[ProductRecord])]) -> Result<()>;

    /// Single-scope form of [`ProductRepository::save_batches`]
    async fn save_batch(&self, scope: StoreScope, records: &[ProductRecord]) -> Result<()> {
        self.save_batches(&[(scope, records)]).await
    }

    /// Every record of `host` in `scope`
    async fn load_by_host(&self, scope: StoreScope, host: &str) -> Result<Vec<ProductRecord>>;
}
