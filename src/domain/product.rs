use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::gtin::is_valid_gtin;

/// Facts extracted from one product page. Only `url` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    /// Reference / strike-through price
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// GTIN / EAN as published by the site
    #[serde(default)]
    pub gtin: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub in_stock: Option<bool>,
}

impl Product {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// GTIN only when it passes check-digit validation
    pub fn valid_gtin(&self) -> Option<&str> {
        self.gtin.as_deref().filter(|g| is_valid_gtin(g))
    }

    /// `true` when the extractor found nothing worth storing
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.valid_gtin().is_none()
    }
}

/// Fields the merge step compares and overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedField {
    Name,
    Price,
    OriginalPrice,
    Currency,
    ImageUrl,
    Gtin,
    Brand,
    InStock,
}

impl TrackedField {
    pub const ALL: [Self; 8] = [
        Self::Name,
        Self::Price,
        Self::OriginalPrice,
        Self::Currency,
        Self::ImageUrl,
        Self::Gtin,
        Self::Brand,
        Self::InStock,
    ];

    /// Fields whose changes end up in `history` by default
    pub const HISTORY_DEFAULT: [Self; 3] = [Self::Price, Self::OriginalPrice, Self::InStock];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::OriginalPrice => "originalPrice",
            Self::Currency => "currency",
            Self::ImageUrl => "imageUrl",
            Self::Gtin => "gtin",
            Self::Brand => "brand",
            Self::InStock => "inStock",
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field value as it appears in a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Option<FieldValue>,
    pub to: FieldValue,
}

/// One append-only entry of a record's change history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<FixedOffset>,
    pub changed_fields: BTreeMap<TrackedField, FieldChange>,
}

/// Persistent, deduplicated view of one product on one site.
///
/// `product.url` keeps the first normalized URL the record was created from;
/// every URL observed later lands in `source_urls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub host: String,
    #[serde(flatten)]
    pub product: Product,
    pub first_seen: DateTime<FixedOffset>,
    pub last_updated: DateTime<FixedOffset>,
    pub last_crawled: DateTime<FixedOffset>,
    pub source_urls: BTreeSet<String>,
    #[serde(default)]
    pub lastmod_by_url: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

impl ProductRecord {
    /// Compare everything except `history` and the crawl/update timestamps.
    /// This is the "did anything change" test of the merge step.
    pub fn same_facts(&self, other: &Self) -> bool {
        self.id == other.id
            && self.host == other.host
            && self.product == other.product
            && self.first_seen == other.first_seen
            && self.source_urls == other.source_urls
            && self.lastmod_by_url == other.lastmod_by_url
    }
}
