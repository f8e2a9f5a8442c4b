//! URL 정규화 및 제품 ID 규칙
//!
//! Every product URL goes through [`UrlNormalizer`] before it is used as a
//! dedup key: query string and fragment are dropped, the host is lowercased
//! and a trailing slash is removed.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::gtin::is_valid_gtin;
use crate::domain::product::Product;

/// Normalizer used when a site does not declare its own rules.
pub static DEFAULT_NORMALIZER: UrlNormalizer = UrlNormalizer::new();

/// Canonicalizes URLs into stable dedup keys.
///
/// `keep_query` lists query parameters that identify a product on some sites
/// (e.g. `?variant=`). They survive normalization, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlNormalizer {
    #[serde(default)]
    pub keep_query: Vec<String>,
}

impl UrlNormalizer {
    pub const fn new() -> Self {
        Self { keep_query: Vec::new() }
    }

    pub fn keeping(params: Vec<String>) -> Self {
        Self { keep_query: params }
    }

    /// Normalize a raw URL. Unparsable input is cleaned with plain string
    /// operations so that it still yields a usable key.
    pub fn normalize(&self, raw: &str) -> String {
        let raw = raw.trim();
        let Ok(parsed) = Url::parse(raw) else {
            return strip_suffixes(raw);
        };

        let mut kept: Vec<(String, String)> = if self.keep_query.is_empty() {
            Vec::new()
        } else {
            parsed
                .query_pairs()
                .filter(|(k, _)| self.keep_query.iter().any(|keep| keep == k))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        };
        kept.sort();

        let mut out = String::with_capacity(raw.len());
        out.push_str(parsed.scheme());
        out.push_str("://");
        if let Some(host) = parsed.host_str() {
            out.push_str(&host.to_ascii_lowercase());
        }
        if let Some(port) = parsed.port() {
            out.push(':');
            out.push_str(&port.to_string());
        }
        out.push_str(parsed.path().trim_end_matches('/'));

        if !kept.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept.iter())
                .finish();
            out.push('?');
            out.push_str(&query);
        }

        out
    }
}

/// Normalize with the default rules.
pub fn normalize_url(raw: &str) -> String {
    DEFAULT_NORMALIZER.normalize(raw)
}

fn strip_suffixes(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    raw[..end].trim_end_matches('/').to_string()
}

/// Resolve `href` against the document it was found in. Handles absolute,
/// protocol-relative (`//cdn/...`), absolute-path (`/p/1`) and relative forms.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    Url::parse(base).ok()?.join(href).ok().map(String::from)
}

/// Host part of a URL, lowercased.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// `true` when `raw` points at `base_host` or one of its subdomains.
pub fn is_same_host(raw: &str, base_host: &str) -> bool {
    let base = base_host.trim_start_matches("www.").to_ascii_lowercase();
    host_of(raw).is_some_and(|host| {
        let host = host.trim_start_matches("www.");
        host == base || host.ends_with(&format!(".{base}"))
    })
}

/// Dedup id for a product seen on `site_host`:
/// `"<host>|<gtin>"` when the product carries a valid GTIN, otherwise
/// `"<host>|<normalized url>"`.
pub fn product_id(site_host: &str, product: &Product, normalized_url: &str) -> String {
    match product.gtin.as_deref().filter(|g| is_valid_gtin(g)) {
        Some(gtin) => format!("{site_host}|{gtin}"),
        None => format!("{site_host}|{normalized_url}"),
    }
}
