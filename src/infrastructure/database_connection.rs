// Database connection and pool management
// SQLite through sqlx; the schema is created in place by `migrate()`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

const MAX_CONNECTIONS: u32 = 5;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // One row per record and scope; the full record lives in `record` as JSON
        let create_records_sql = r#"
            CREATE TABLE IF NOT EXISTS product_records (
                scope TEXT NOT NULL,
                host TEXT NOT NULL,
                id TEXT NOT NULL,
                record TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                last_crawled TEXT NOT NULL,
                PRIMARY KEY (scope, id)
            )
        "#;

        let create_index_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_product_records_host ON product_records (scope, host)
        "#;

        sqlx::query(create_records_sql).execute(&self.pool).await?;
        sqlx::query(create_index_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migration.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        assert!(!db.pool().is_closed());

        db.migrate().await?;
        // 두 번 실행해도 안전해야 한다
        db.migrate().await?;

        let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='product_records'")
            .fetch_optional(db.pool())
            .await?;
        assert!(result.is_some());
        Ok(())
    }
}
