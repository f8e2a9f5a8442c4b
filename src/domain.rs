//! Domain module - Core business logic and entities
//!
//! Products, product records, identity rules and the collaborator
//! interfaces (site adapters, transports, repositories) the engine is
//! written against.

pub mod constants;
pub mod gtin;
pub mod page;
pub mod product;
pub mod product_url;
pub mod repositories;
pub mod site;

// Re-export commonly used items for convenience
pub use gtin::is_valid_gtin;
pub use page::{FetchError, FetchedPage, NavigationOptions, PageFetcher, TextFetcher, WaitStrategy};
pub use product::{FieldChange, FieldValue, HistoryEntry, Product, ProductRecord, TrackedField};
pub use product_url::{UrlNormalizer, normalize_url, product_id};
pub use repositories::{ProductRepository, StoreScope};
pub use site::{
    Capabilities, ConsentHandler, DiscoveryProfile, Extraction, PacingConfig, PacingProfile, ProductAdjuster,
    ProductExtractor, ProductUrlFilter, RampStep, SiteAdapter, SiteIdentity,
};
