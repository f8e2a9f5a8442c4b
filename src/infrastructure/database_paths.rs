//! 데이터베이스 경로 관리
//!
//! 데이터베이스 경로는 이 모듈에서만 결정한다:
//! 설정에 URL이 있으면 그대로, 없으면 플랫폼 데이터 디렉토리 아래 기본 파일.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::infrastructure::config::{DatabaseConfig, defaults};

/// 앱 데이터 디렉토리 (`~/.local/share/catalog-crawler` 등)
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(defaults::APP_DIR_NAME)
}

/// 기본 데이터베이스 파일 경로
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("database").join(defaults::DATABASE_FILE_NAME)
}

/// SQLx 형식의 URL
pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

/// File path behind a `sqlite:` URL, `None` for in-memory databases
pub fn sqlite_file_path(database_url: &str) -> Option<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty() && path != ":memory:").then(|| PathBuf::from(path))
}

/// Resolve the URL to open and make sure its directory exists.
pub async fn resolve_database_url(config: &DatabaseConfig) -> Result<String> {
    let url = config
        .url
        .clone()
        .unwrap_or_else(|| sqlite_url(&default_database_path()));

    if let Some(parent) = sqlite_file_path(&url).as_deref().and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("데이터베이스 디렉토리 생성 실패: {}", parent.display()))?;
        }
    }

    info!("📁 Database: {}", url);
    Ok(url)
}
