//! 실행 결과 스냅샷 내보내기
//!
//! `<export_dir>/<site key>.json`, pretty-printed and ordered by id.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::product::ProductRecord;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotExport<'a> {
    pub site: &'a str,
    pub run_id: &'a str,
    pub exported_at: DateTime<FixedOffset>,
    pub touched_only: bool,
    pub count: usize,
    pub records: &'a [ProductRecord],
}

pub fn export_path(dir: &Path, site_key: &str) -> PathBuf {
    let file_name: String = site_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect();
    dir.join(format!("{file_name}.json"))
}

/// Write the snapshot and return where it went
pub async fn write_snapshot(dir: &Path, snapshot: &SnapshotExport<'_>) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let path = export_path(dir, snapshot.site);
    let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize snapshot")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("📤 Exported {} records to {}", snapshot.count, path.display());
    Ok(path)
}
