//! # Sitemap Discovery Engine
//!
//! 사이트맵 트리를 너비 우선으로 순회하여 제품 URL 후보를 수집한다.
//!
//! Seeds come from the site's configured sitemaps (or a per-run override),
//! extra same-host sitemaps and `robots.txt`. Index documents push their
//! children back onto a FIFO queue, urlset documents contribute normalized
//! product URLs together with their `<lastmod>`. A sitemap that cannot be
//! fetched or parsed is logged and skipped.

use regex::Regex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use crate::crawling::DiscoveryError;
use crate::domain::constants::runner as runner_defaults;
use crate::domain::page::TextFetcher;
use crate::domain::product_url::{UrlNormalizer, is_same_host, resolve_url};
use crate::domain::site::{DiscoveryProfile, ProductUrlFilter};

/// One `<url>` entry of a urlset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: Option<String>,
}

/// What a single sitemap document contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitemapDocument {
    /// Child sitemaps of an index, unresolved
    pub children: Vec<String>,
    pub entries: Vec<SitemapEntry>,
}

/// Regex based sitemap reader. Tolerates namespace prefixes, CDATA and
/// escaped ampersands.
pub struct SitemapParser {
    index_marker: Regex,
    urlset_marker: Regex,
    url_block: Regex,
    loc: Regex,
    lastmod: Regex,
}

impl SitemapParser {
    pub fn new() -> Result<Self, DiscoveryError> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| DiscoveryError::Pattern(e.to_string()));
        Ok(Self {
            index_marker: compile(r"(?i)<(?:[\w-]+:)?sitemapindex[\s>]")?,
            urlset_marker: compile(r"(?i)<(?:[\w-]+:)?urlset[\s>]")?,
            url_block: compile(r"(?is)<(?:[\w-]+:)?url[\s>](.*?)</(?:[\w-]+:)?url>")?,
            loc: compile(r"(?is)<(?:[\w-]+:)?loc>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</(?:[\w-]+:)?loc>")?,
            lastmod: compile(r"(?is)<(?:[\w-]+:)?lastmod>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</(?:[\w-]+:)?lastmod>")?,
        })
    }

    pub fn parse(&self, body: &str) -> Result<SitemapDocument, DiscoveryError> {
        let is_index = self.index_marker.is_match(body);
        let is_urlset = self.urlset_marker.is_match(body);
        if !is_index && !is_urlset {
            return Err(DiscoveryError::UnrecognizedDocument);
        }

        let mut document = SitemapDocument::default();
        if is_index {
            document.children = self.locs(body).collect();
        }
        if is_urlset {
            document.entries = self
                .url_block
                .captures_iter(body)
                .filter_map(|block| {
                    let block = block.get(1)?.as_str();
                    let loc = self.locs(block).next()?;
                    let lastmod = self
                        .lastmod
                        .captures(block)
                        .and_then(|c| c.get(1))
                        .map(|m| decode_entities(m.as_str().trim()))
                        .filter(|s| !s.is_empty());
                    Some(SitemapEntry { loc, lastmod })
                })
                .collect();
        }
        Ok(document)
    }

    fn locs<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        self.loc
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| decode_entities(m.as_str().trim()))
            .filter(|s| !s.is_empty())
    }
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `Sitemap:` directives of a robots.txt body
pub fn robots_sitemaps(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("sitemap")
                .then(|| value.trim().to_string())
        })
        .filter(|url| !url.is_empty())
        .collect()
}

/// Result of one discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveredUrls {
    /// normalized product URL -> latest `<lastmod>` seen for it
    pub urls: BTreeMap<String, Option<String>>,
    pub sitemaps_fetched: usize,
    pub sitemaps_failed: usize,
}

impl DiscoveredUrls {
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    fn insert(&mut self, url: String, lastmod: Option<String>) {
        let slot = self.urls.entry(url).or_default();
        if lastmod > *slot {
            *slot = lastmod;
        }
    }
}

pub struct SitemapDiscovery<'a> {
    fetcher: &'a dyn TextFetcher,
    parser: SitemapParser,
    max_sitemaps: usize,
}

impl<'a> SitemapDiscovery<'a> {
    pub fn new(fetcher: &'a dyn TextFetcher) -> Result<Self, DiscoveryError> {
        Ok(Self {
            fetcher,
            parser: SitemapParser::new()?,
            max_sitemaps: runner_defaults::MAX_SITEMAPS,
        })
    }

    #[must_use]
    pub fn with_max_sitemaps(mut self, max_sitemaps: usize) -> Self {
        self.max_sitemaps = max_sitemaps.max(1);
        self
    }

    /// Build the seed list for a site.
    ///
    /// `sitemap_override` replaces the configured sitemaps when non-empty;
    /// `extra` entries are kept only if they point at `base_host`.
    pub async fn collect_seeds(
        &self,
        profile: &DiscoveryProfile,
        base_host: &str,
        sitemap_override: Option<&[String]>,
        extra: &[String],
    ) -> Vec<String> {
        let mut seeds: Vec<String> = match sitemap_override {
            Some(list) if !list.is_empty() => list.to_vec(),
            _ => profile.sitemaps.clone(),
        };

        for url in extra {
            if is_same_host(url, base_host) {
                seeds.push(url.clone());
            } else {
                debug!("⏭️ Ignoring extra sitemap outside {}: {}", base_host, url);
            }
        }

        if profile.use_robots {
            let robots_url = format!("https://{base_host}/robots.txt");
            match self.fetcher.fetch_text(&robots_url).await {
                Ok(body) => {
                    let advertised = robots_sitemaps(&body);
                    debug!("🤖 robots.txt advertises {} sitemaps", advertised.len());
                    seeds.extend(advertised);
                }
                Err(e) => warn!("⚠️ Could not read {}: {}", robots_url, e),
            }
        }

        let mut seen = HashSet::new();
        seeds.retain(|url| seen.insert(url.trim().to_string()));
        seeds
    }

    /// Walk the sitemap tree rooted at `seeds`.
    pub async fn discover(
        &self,
        seeds: &[String],
        filter: &ProductUrlFilter,
        normalizer: &UrlNormalizer,
    ) -> DiscoveredUrls {
        let mut queue: VecDeque<String> = seeds.iter().map(|s| s.trim().to_string()).collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut found = DiscoveredUrls::default();

        while let Some(sitemap_url) = queue.pop_front() {
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }
            if visited.len() > self.max_sitemaps {
                warn!("⚠️ Sitemap limit ({}) reached, stopping discovery", self.max_sitemaps);
                break;
            }

            let document = match self.load(&sitemap_url).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("⚠️ Skipping sitemap {}: {}", sitemap_url, e);
                    found.sitemaps_failed += 1;
                    continue;
                }
            };
            found.sitemaps_fetched += 1;

            for child in &document.children {
                if let Some(resolved) = resolve_url(&sitemap_url, child) {
                    if !visited.contains(&resolved) {
                        queue.push_back(resolved);
                    }
                }
            }

            let before = found.len();
            for entry in document.entries {
                let Some(resolved) = resolve_url(&sitemap_url, &entry.loc) else {
                    continue;
                };
                let normalized = normalizer.normalize(&resolved);
                if filter.matches(&normalized) {
                    found.insert(normalized, entry.lastmod);
                }
            }
            debug!(
                "🗺️ {}: {} children, {} new product URLs",
                sitemap_url,
                document.children.len(),
                found.len() - before
            );
        }

        info!(
            "🔍 Discovery finished: {} product URLs from {} sitemaps ({} failed)",
            found.len(),
            found.sitemaps_fetched,
            found.sitemaps_failed
        );
        found
    }

    async fn load(&self, url: &str) -> Result<SitemapDocument, DiscoveryError> {
        let body = self
            .fetcher
            .fetch_text(url)
            .await
            .map_err(|e| DiscoveryError::Fetch(e.to_string()))?;
        self.parser.parse(&body)
    }
}
