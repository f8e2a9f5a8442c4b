//! # Product Dedup Store
//!
//! In-memory, host-scoped map of [`ProductRecord`]s. Incoming products are
//! merged field by field: a present value overwrites a different stored
//! value, a missing value never erases anything.
//!
//! The store is owned by exactly one task (see `store_actor`), so none of
//! the methods here need locking.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::constants::store as store_defaults;
use crate::domain::product::{FieldChange, FieldValue, HistoryEntry, Product, ProductRecord, TrackedField};
use crate::domain::product_url::{UrlNormalizer, product_id};
use crate::domain::repositories::StoreScope;

/// Merge behavior of one store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub track_history: bool,
    pub history_fields: BTreeSet<TrackedField>,
    /// Time zone every timestamp is written in
    pub offset: FixedOffset,
    pub normalizer: UrlNormalizer,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            track_history: false,
            history_fields: TrackedField::HISTORY_DEFAULT.into_iter().collect(),
            offset: FixedOffset::east_opt(store_defaults::UTC_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix()),
            normalizer: UrlNormalizer::new(),
        }
    }
}

impl StoreOptions {
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Result of one upsert
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub record: ProductRecord,
    /// Anything other than history and crawl timestamps changed
    pub changed: bool,
    pub created: bool,
    pub diff: BTreeMap<TrackedField, FieldChange>,
}

#[derive(Debug)]
pub struct ProductStore {
    scope: StoreScope,
    host: String,
    records: HashMap<String, ProductRecord>,
    /// normalized URL -> id, keeps ids stable once a URL has been seen
    url_index: HashMap<String, String>,
    dirty: BTreeSet<String>,
    touched: BTreeSet<String>,
    options: StoreOptions,
}

impl ProductStore {
    pub fn new(scope: StoreScope, host: impl Into<String>, options: StoreOptions) -> Self {
        Self {
            scope,
            host: host.into(),
            records: HashMap::new(),
            url_index: HashMap::new(),
            dirty: BTreeSet::new(),
            touched: BTreeSet::new(),
            options,
        }
    }

    /// Rebuild a store from persisted records
    pub fn from_records(
        scope: StoreScope,
        host: impl Into<String>,
        records: Vec<ProductRecord>,
        options: StoreOptions,
    ) -> Self {
        let mut store = Self::new(scope, host, options);
        for record in records {
            for url in &record.source_urls {
                store.url_index.insert(url.clone(), record.id.clone());
            }
            store.records.insert(record.id.clone(), record);
        }
        store
    }

    pub const fn scope(&self) -> StoreScope {
        self.scope
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current time in the store's time zone
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.options.now()
    }

    pub fn get(&self, id: &str) -> Option<&ProductRecord> {
        self.records.get(id)
    }

    /// Id an incoming product maps to. A URL that is already known keeps
    /// the id it was first stored under.
    pub fn resolve_id(&self, product: &Product) -> String {
        let url = self.options.normalizer.normalize(&product.url);
        self.url_index
            .get(&url)
            .cloned()
            .unwrap_or_else(|| product_id(&self.host, product, &url))
    }

    pub fn upsert(&mut self, product: &Product, lastmod: Option<&str>) -> UpsertOutcome {
        let now = self.options.now();
        self.upsert_at(product, lastmod, now)
    }

    pub fn upsert_at(&mut self, product: &Product, lastmod: Option<&str>, now: DateTime<FixedOffset>) -> UpsertOutcome {
        let url = self.options.normalizer.normalize(&product.url);
        let id = self.resolve_id(product);

        self.url_index.insert(url.clone(), id.clone());
        self.touched.insert(id.clone());
        self.dirty.insert(id.clone());

        let Some(existing) = self.records.get_mut(&id) else {
            let record = new_record(&id, &self.host, product, &url, lastmod, now);
            self.records.insert(id, record.clone());
            return UpsertOutcome {
                record,
                changed: true,
                created: true,
                diff: BTreeMap::new(),
            };
        };

        let before = existing.clone();
        existing.source_urls.insert(url.clone());
        if let Some(lastmod) = lastmod {
            existing.lastmod_by_url.insert(url, lastmod.to_string());
        }
        let diff = merge_fields(&mut existing.product, product);

        if self.options.track_history {
            let changed_fields: BTreeMap<TrackedField, FieldChange> = diff
                .iter()
                .filter(|(field, _)| self.options.history_fields.contains(field))
                .map(|(field, change)| (*field, change.clone()))
                .collect();
            if !changed_fields.is_empty() {
                existing.history.push(HistoryEntry {
                    timestamp: now,
                    changed_fields,
                });
            }
        }

        let changed = !before.same_facts(existing);
        existing.last_crawled = now.max(before.last_crawled);
        if changed {
            existing.last_updated = now.max(before.last_updated);
        }

        UpsertOutcome {
            record: existing.clone(),
            changed,
            created: false,
            diff,
        }
    }

    /// Every known source URL with its last sitemap `lastmod`
    pub fn known_urls(&self) -> BTreeMap<String, Option<String>> {
        self.records
            .values()
            .flat_map(|record| {
                record
                    .source_urls
                    .iter()
                    .map(|url| (url.clone(), record.lastmod_by_url.get(url).cloned()))
            })
            .collect()
    }

    /// Records modified since the last successful flush
    pub fn dirty_records(&self) -> Vec<ProductRecord> {
        self.dirty
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn mark_clean(&mut self) {
        self.dirty.clear();
    }

    /// All records, or only the ones visited in this run, sorted by id
    pub fn snapshot(&self, touched_only: bool) -> Vec<ProductRecord> {
        let mut records: Vec<ProductRecord> = if touched_only {
            self.touched
                .iter()
                .filter_map(|id| self.records.get(id).cloned())
                .collect()
        } else {
            self.records.values().cloned().collect()
        };
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

fn new_record(
    id: &str,
    host: &str,
    product: &Product,
    url: &str,
    lastmod: Option<&str>,
    now: DateTime<FixedOffset>,
) -> ProductRecord {
    let mut product = product.clone();
    product.url = url.to_string();

    ProductRecord {
        id: id.to_string(),
        host: host.to_string(),
        product,
        first_seen: now,
        last_updated: now,
        last_crawled: now,
        source_urls: BTreeSet::from([url.to_string()]),
        lastmod_by_url: lastmod
            .map(|lm| BTreeMap::from([(url.to_string(), lm.to_string())]))
            .unwrap_or_default(),
        history: Vec::new(),
    }
}

/// Overwrite `$stored` with `$incoming` when the latter is present and
/// different, recording the change.
macro_rules! merge_field {
    ($diff:ident, $field:expr, $stored:expr, $incoming:expr, $variant:path) => {
        if let Some(value) = &$incoming {
            if $stored.as_ref() != Some(value) {
                $diff.insert(
                    $field,
                    FieldChange {
                        from: $stored.clone().map($variant),
                        to: $variant(value.clone()),
                    },
                );
                $stored = Some(value.clone());
            }
        }
    };
}

fn merge_fields(stored: &mut Product, incoming: &Product) -> BTreeMap<TrackedField, FieldChange> {
    let mut diff = BTreeMap::new();
    merge_field!(diff, TrackedField::Name, stored.name, incoming.name, FieldValue::Text);
    merge_field!(diff, TrackedField::Price, stored.price, incoming.price, FieldValue::Number);
    merge_field!(diff, TrackedField::OriginalPrice, stored.original_price, incoming.original_price, FieldValue::Number);
    merge_field!(diff, TrackedField::Currency, stored.currency, incoming.currency, FieldValue::Text);
    merge_field!(diff, TrackedField::ImageUrl, stored.image_url, incoming.image_url, FieldValue::Text);
    merge_field!(diff, TrackedField::Gtin, stored.gtin, incoming.gtin, FieldValue::Text);
    merge_field!(diff, TrackedField::Brand, stored.brand, incoming.brand, FieldValue::Text);
    merge_field!(diff, TrackedField::InStock, stored.in_stock, incoming.in_stock, FieldValue::Flag);
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const HOST: &str = "site.test";

    fn t0() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-05-01T09:00:00+09:00").unwrap()
    }

    fn product(url: &str) -> Product {
        Product {
            name: Some("Widget".into()),
            price: Some(19.99),
            currency: Some("EUR".into()),
            in_stock: Some(true),
            ..Product::new(url)
        }
    }

    fn history_store() -> ProductStore {
        ProductStore::new(
            StoreScope::Global,
            HOST,
            StoreOptions {
                track_history: true,
                ..StoreOptions::default()
            },
        )
    }

    #[test]
    fn second_identical_upsert_is_not_a_change() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        let p = product("https://site.test/p/1");

        let first = store.upsert_at(&p, Some("2024-04-30"), t0());
        assert!(first.created && first.changed);

        let later = t0() + Duration::hours(1);
        let second = store.upsert_at(&p, Some("2024-04-30"), later);
        assert!(!second.changed);
        assert!(!second.created);
        assert_eq!(second.record.last_updated, t0());
        assert_eq!(second.record.last_crawled, later);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn id_is_stable_once_assigned() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        let mut p = product("https://site.test/p/1");
        p.gtin = Some("4006381333931".into());
        let created = store.upsert_at(&p, None, t0());
        assert_eq!(created.record.id, "site.test|4006381333931");

        p.gtin = Some("40123455".into());
        let merged = store.upsert_at(&p, None, t0() + Duration::minutes(5));
        assert_eq!(merged.record.id, "site.test|4006381333931");
        assert_eq!(merged.record.product.gtin.as_deref(), Some("40123455"));
        assert!(merged.changed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_values_never_erase_known_facts() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        store.upsert_at(&product("https://site.test/p/1"), None, t0());

        let sparse = Product::new("https://site.test/p/1/?ref=home");
        let outcome = store.upsert_at(&sparse, None, t0() + Duration::minutes(1));
        assert!(!outcome.changed);
        assert_eq!(outcome.record.product.name.as_deref(), Some("Widget"));
        assert_eq!(outcome.record.product.price, Some(19.99));
        assert!(outcome.diff.is_empty());
    }

    #[test]
    fn history_records_tracked_fields_only() {
        let mut store = history_store();
        store.upsert_at(&product("https://site.test/p/1"), None, t0());

        let mut update = product("https://site.test/p/1");
        update.price = Some(17.5);
        update.name = Some("Widget v2".into());
        let later = t0() + Duration::hours(2);
        let outcome = store.upsert_at(&update, None, later);

        assert!(outcome.changed);
        assert_eq!(outcome.record.last_updated, later);
        assert_eq!(outcome.record.history.len(), 1);
        let entry = &outcome.record.history[0];
        assert_eq!(entry.timestamp, later);
        assert_eq!(entry.changed_fields.len(), 1);
        assert_eq!(
            entry.changed_fields.get(&TrackedField::Price),
            Some(&FieldChange {
                from: Some(FieldValue::Number(19.99)),
                to: FieldValue::Number(17.5),
            })
        );
        assert!(outcome.diff.contains_key(&TrackedField::Name));
    }

    #[test]
    fn same_ean_on_two_urls_is_one_record() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        let mut a = product("https://site.test/p/1");
        a.gtin = Some("40123455".into());
        let mut b = product("https://site.test/p/2");
        b.gtin = Some("40123455".into());

        store.upsert_at(&a, None, t0());
        let outcome = store.upsert_at(&b, None, t0());

        assert_eq!(store.len(), 1);
        assert_eq!(outcome.record.id, "site.test|40123455");
        assert_eq!(outcome.record.source_urls.len(), 2);
        assert!(outcome.changed);
    }

    #[test]
    fn different_eans_are_two_records() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        let mut a = product("https://site.test/p/1");
        a.gtin = Some("40123455".into());
        let mut b = product("https://site.test/p/2");
        b.gtin = Some("4006381333931".into());

        store.upsert_at(&a, None, t0());
        store.upsert_at(&b, None, t0());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn timestamps_stay_ordered() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        store.upsert_at(&product("https://site.test/p/1"), None, t0());

        let mut update = product("https://site.test/p/1");
        update.price = Some(1.0);
        // a clock step backwards must not reorder the timestamps
        let outcome = store.upsert_at(&update, None, t0() - Duration::minutes(10));
        let record = outcome.record;
        assert!(record.first_seen <= record.last_updated);
        assert!(record.last_updated <= record.last_crawled);
    }

    #[test]
    fn tracks_lastmod_and_dirty_state() {
        let mut store = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        store.upsert_at(&product("https://site.test/p/1"), Some("2024-01-01"), t0());
        store.upsert_at(&product("https://site.test/p/2"), None, t0());

        let known = store.known_urls();
        assert_eq!(known.get("https://site.test/p/1"), Some(&Some("2024-01-01".to_string())));
        assert_eq!(known.get("https://site.test/p/2"), Some(&None));

        assert_eq!(store.dirty_records().len(), 2);
        store.mark_clean();
        assert_eq!(store.dirty_count(), 0);

        let changed = store.upsert_at(&product("https://site.test/p/1"), Some("2024-02-01"), t0());
        assert!(changed.changed);
        assert_eq!(store.dirty_count(), 1);
    }

    #[test]
    fn snapshot_can_be_limited_to_touched_records() {
        let existing = {
            let mut seed = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
            seed.upsert_at(&product("https://site.test/p/old"), None, t0());
            seed.snapshot(false)
        };
        let mut store = ProductStore::from_records(StoreScope::Site, HOST, existing, StoreOptions::default());
        store.upsert_at(&product("https://site.test/p/new"), None, t0());

        assert_eq!(store.snapshot(false).len(), 2);
        let touched = store.snapshot(true);
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].product.url, "https://site.test/p/new");
    }

    #[test]
    fn reloaded_store_reuses_ids_by_url() {
        let mut seed = ProductStore::new(StoreScope::Site, HOST, StoreOptions::default());
        seed.upsert_at(&product("https://site.test/p/1"), None, t0());
        let mut store = ProductStore::from_records(StoreScope::Site, HOST, seed.snapshot(false), StoreOptions::default());

        let mut p = product("https://site.test/p/1");
        p.gtin = Some("40123455".into());
        let outcome = store.upsert_at(&p, None, t0());
        assert_eq!(outcome.record.id, "site.test|https://site.test/p/1");
        assert!(!outcome.created);
    }
}
