//! SQLite 제품 레코드 저장소
//!
//! Every flush is written in one transaction covering all of its scopes:
//! a crash mid-flush leaves the previous state untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::product::ProductRecord;
use crate::domain::repositories::{ProductRepository, StoreScope};

pub struct SqliteProductRepository {
    pool: SqlitePool,
}

impl SqliteProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records in `scope`
    pub async fn count(&self, scope: StoreScope) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM product_records WHERE scope = ?")
            .bind(scope.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl ProductRepository for SqliteProductRepository {
    async fn save_batches(&self, batches: &[(StoreScope, &[ProductRecord])]) -> Result<()> {
        let total: usize = batches.iter().map(|(_, records)| records.len()).sum();
        if total == 0 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for (scope, records) in batches {
            for record in records.iter() {
                let json = serde_json::to_string(record)
                    .with_context(|| format!("Failed to serialize record {}", record.id))?;
                sqlx::query(
                    r#"
                    INSERT INTO product_records (scope, host, id, record, first_seen, last_updated, last_crawled)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (scope, id) DO UPDATE SET
                        host = excluded.host,
                        record = excluded.record,
                        last_updated = excluded.last_updated,
                        last_crawled = excluded.last_crawled
                    "#,
                )
                .bind(scope.as_str())
                .bind(&record.host)
                .bind(&record.id)
                .bind(json)
                .bind(record.first_seen.to_rfc3339())
                .bind(record.last_updated.to_rfc3339())
                .bind(record.last_crawled.to_rfc3339())
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert {} record {}", scope, record.id))?;
            }
        }

        tx.commit().await.context("Failed to commit batch transaction")?;

        debug!("💾 Saved {} records across {} scope batch(es)", total, batches.len());
        Ok(())
    }

    async fn load_by_host(&self, scope: StoreScope, host: &str) -> Result<Vec<ProductRecord>> {
        let rows = sqlx::query("SELECT record FROM product_records WHERE scope = ? AND host = ? ORDER BY id")
            .bind(scope.as_str())
            .bind(host)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load {scope} records for {host}"))?;

        rows.iter()
            .map(|row| {
                let json: String = row.try_get("record")?;
                serde_json::from_str(&json).context("Failed to decode stored record")
            })
            .collect()
    }
}
