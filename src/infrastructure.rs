//! Infrastructure layer for configuration, logging, HTTP and persistence
//!
//! Implementations of the collaborator traits declared in `domain`:
//! the HTTP client (sitemap text and product pages), the standard product
//! extractor and the SQLite / in-memory product repositories.

pub mod config;
pub mod database_connection;
pub mod database_paths;
pub mod html_parser;
pub mod logging;
pub mod memory_repository;
pub mod product_repository;
pub mod simple_http_client;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, RunConfig, RunMode, SiteConfig};
pub use database_connection::DatabaseConnection;
pub use html_parser::StandardProductExtractor;
pub use logging::init_logging;
pub use memory_repository::InMemoryProductRepository;
pub use product_repository::SqliteProductRepository;
pub use simple_http_client::HttpClient;
