//! 설정 기반 사이트 어댑터
//!
//! Turns a `[[sites]]` configuration entry into a [`SiteAdapter`] that uses
//! the standard extractor. Sites that need custom extraction implement the
//! trait directly instead.

use crate::domain::product_url::UrlNormalizer;
use crate::domain::site::{DiscoveryProfile, Extraction, PacingProfile, ProductUrlFilter, SiteAdapter, SiteIdentity};
use crate::infrastructure::config::{ConfigError, SiteConfig};

#[derive(Debug, Clone)]
pub struct ConfiguredSiteAdapter {
    identity: SiteIdentity,
    discovery: DiscoveryProfile,
    pacing: PacingProfile,
    normalizer: UrlNormalizer,
    default_currency: Option<String>,
}

impl ConfiguredSiteAdapter {
    pub fn from_config(config: &SiteConfig) -> Result<Self, ConfigError> {
        let product_filter = match config.compiled_pattern()? {
            Some(re) => ProductUrlFilter::Pattern(re),
            None => ProductUrlFilter::Any,
        };
        let base_host = config.base_host.trim().to_ascii_lowercase();

        Ok(Self {
            identity: SiteIdentity {
                key: config.key.clone(),
                display_name: config.display_name.clone().unwrap_or_else(|| config.key.clone()),
                base_host,
            },
            discovery: DiscoveryProfile {
                sitemaps: config.sitemaps.clone(),
                product_filter,
                use_robots: config.use_robots,
            },
            pacing: PacingProfile {
                rate: config.pacing.rate.clone().normalized(),
                ..config.pacing.clone()
            },
            normalizer: if config.keep_query.is_empty() {
                UrlNormalizer::new()
            } else {
                UrlNormalizer::keeping(config.keep_query.clone())
            },
            default_currency: config.default_currency.as_ref().map(|c| c.to_uppercase()),
        })
    }
}

impl SiteAdapter for ConfiguredSiteAdapter {
    fn identity(&self) -> &SiteIdentity {
        &self.identity
    }

    fn discovery(&self) -> &DiscoveryProfile {
        &self.discovery
    }

    fn pacing(&self) -> &PacingProfile {
        &self.pacing
    }

    fn extraction(&self) -> Extraction<'_> {
        Extraction::Standard { adjuster: None }
    }

    fn url_normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    fn default_currency(&self) -> Option<&str> {
        self.default_currency.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site::RampStep;

    fn site() -> SiteConfig {
        let mut config = SiteConfig {
            key: "shop".into(),
            base_host: "www.Shop.test".into(),
            sitemaps: vec!["https://shop.test/sitemap.xml".into()],
            product_url_pattern: Some(r"/p/\d+".into()),
            default_currency: Some("eur".into()),
            keep_query: vec!["variant".into()],
            ..SiteConfig::default()
        };
        config.pacing.rate.ramp = vec![
            RampStep { after_secs: 60.0, rate: 1.0 },
            RampStep { after_secs: 0.0, rate: 0.5 },
        ];
        config
    }

    #[test]
    fn builds_adapter_from_config() {
        let adapter = ConfiguredSiteAdapter::from_config(&site()).unwrap();

        assert_eq!(adapter.identity().base_host, "www.shop.test");
        assert_eq!(adapter.identity().display_name, "shop");
        assert!(adapter.discovery().product_filter.matches("https://shop.test/p/12"));
        assert!(!adapter.discovery().product_filter.matches("https://shop.test/about"));
        assert_eq!(adapter.default_currency(), Some("EUR"));
        assert_eq!(adapter.pacing().rate.ramp[0].after_secs, 0.0);

        let caps = adapter.capabilities();
        assert!(!caps.custom_extractor);
        assert!(!caps.consent_handler);
        assert!(!caps.fastpath_adjuster);
    }

    #[test]
    fn rejects_invalid_pattern() {
        let config = SiteConfig {
            product_url_pattern: Some("(".into()),
            ..site()
        };
        assert!(matches!(
            ConfiguredSiteAdapter::from_config(&config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
