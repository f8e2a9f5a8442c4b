//! Seed URL resolution
//!
//! Seeds come from `run.seed_urls` and from an optional seed file with one
//! URL per line. Blank lines and `#` comments are ignored.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

use crate::domain::product_url::{UrlNormalizer, is_same_host};

/// Parse seed file contents
pub fn parse_seed_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read every configured seed, unfiltered and in input order
pub async fn load_seeds(seed_file: Option<&Path>, seed_urls: &[String]) -> Result<Vec<String>> {
    let mut seeds: Vec<String> = seed_urls
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(path) = seed_file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let from_file = parse_seed_list(&contents);
        debug!("🌱 {} seeds from {}", from_file.len(), path.display());
        seeds.extend(from_file);
    }

    Ok(seeds)
}

/// Seeds that belong to `base_host`, normalized and deduplicated
pub fn seeds_for_site(seeds: &[String], base_host: &str, normalizer: &UrlNormalizer) -> Vec<String> {
    let mut seen = BTreeSet::new();
    seeds
        .iter()
        .filter(|url| is_same_host(url, base_host))
        .map(|url| normalizer.normalize(url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
