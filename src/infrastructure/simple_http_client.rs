//! HTTP client for sitemap discovery and page fetching
//!
//! - Browser-like default headers, cookie store, transparent gzip/brotli
//! - `.gz` sitemaps served as plain gzip files are decompressed here
//! - Text fetches retry with exponential backoff; page fetches are a single
//!   attempt because the runner owns page retries

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::io::Read;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::crawling::retry_policy::{BackoffPolicy, parse_retry_after};
use crate::domain::page::{FetchError, FetchedPage, NavigationOptions, PageFetcher, TextFetcher};
use crate::infrastructure::config::HttpConfig;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// HTTP client shared by discovery and the runner
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl HttpClient {
    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).map_err(|e| anyhow!("Invalid Accept-Language: {}", e))?,
        );

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
                config.retry_jitter_ms,
            ),
        })
    }

    /// One GET returning the decoded body, or the status as an error
    async fn get_text_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                retry_after: retry_after_header(response.headers()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read body: {e}")))?;
        decode_body(&bytes).map_err(|e| FetchError::Extraction(e.to_string()))
    }
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Decompress gzip payloads (`sitemap.xml.gz` without `Content-Encoding`),
/// pass everything else through as UTF-8.
pub fn decode_body(bytes: &[u8]) -> Result<String> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut decoded)
            .map_err(|e| anyhow!("Failed to decompress gzip body: {}", e))?;
        return Ok(decoded);
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[async_trait]
impl TextFetcher for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            debug!("🌐 GET (attempt {}/{}) {}", attempt + 1, self.max_retries + 1, url);
            match self.get_text_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let permanent = matches!(
                        e,
                        FetchError::Http { status, .. }
                            if status == StatusCode::NOT_FOUND.as_u16() || status == StatusCode::GONE.as_u16()
                    );
                    if permanent || attempt >= self.max_retries {
                        return Err(anyhow!("{} ({})", e, url));
                    }
                    let delay = self.backoff.delay_with_hint(attempt, e.retry_after());
                    warn!("⚠️ {} failed: {}, retrying in {:?}", url, e, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Plain HTTP has no render phase: a page counts as loaded once its body is
/// read, so `options.wait` is only meaningful for browser transports.
#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_page(&self, url: &str, options: &NavigationOptions) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(options.timeout)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let retry_after = retry_after_header(response.headers());
        if !response.status().is_success() {
            return Err(FetchError::Http { status, retry_after });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read body: {e}")))?;

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status,
            body,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::WaitStrategy;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(max_retries: u32) -> HttpClient {
        HttpClient::with_config(&HttpConfig {
            max_retries,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            retry_jitter_ms: 0,
            ..HttpConfig::default()
        })
        .unwrap()
    }

    fn navigation() -> NavigationOptions {
        NavigationOptions {
            timeout: Duration::from_secs(5),
            wait: WaitStrategy::default(),
        }
    }

    #[tokio::test]
    async fn decompresses_gzip_sitemaps() {
        let server = MockServer::start().await;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<urlset><url><loc>https://shop.test/p/1</loc></url></urlset>").unwrap();
        let compressed = encoder.finish().unwrap();

        Mock::given(method("GET"))
            .and(path("/sitemap.xml.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/x-gzip")
                    .set_body_bytes(compressed),
            )
            .mount(&server)
            .await;

        let body = fast_client(0)
            .fetch_text(&format!("{}/sitemap.xml.gz", server.uri()))
            .await
            .unwrap();
        assert!(body.contains("<loc>https://shop.test/p/1</loc>"));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<urlset></urlset>"))
            .mount(&server)
            .await;

        let body = fast_client(2)
            .fetch_text(&format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<urlset></urlset>");
    }

    #[tokio::test]
    async fn gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let result = fast_client(2).fetch_text(&format!("{}/sitemap.xml", server.uri())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert!(fast_client(3).fetch_text(&format!("{}/missing.xml", server.uri())).await.is_err());
    }

    #[tokio::test]
    async fn page_fetch_reports_throttling_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><h1>ok</h1></html>"))
            .mount(&server)
            .await;

        let client = fast_client(0);
        let err = client
            .fetch_page(&format!("{}/p/1", server.uri()), &navigation())
            .await
            .unwrap_err();
        assert!(err.is_throttled());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let page = client
            .fetch_page(&format!("{}/p/2", server.uri()), &navigation())
            .await
            .unwrap();
        assert!(page.is_success());
        assert!(page.body.contains("<h1>ok</h1>"));
    }

    #[tokio::test]
    async fn wait_strategy_does_not_change_http_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/p/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><h1>idle</h1></html>"))
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client(0);
        let url = format!("{}/p/3", server.uri());
        for wait in [WaitStrategy::DomContentLoaded, WaitStrategy::Load, WaitStrategy::NetworkIdle] {
            let options = NavigationOptions {
                wait,
                ..navigation()
            };
            let page = client.fetch_page(&url, &options).await.unwrap();
            assert_eq!(page.status, 200);
            assert!(page.body.contains("<h1>idle</h1>"));
        }
    }

    #[test]
    fn plain_bodies_pass_through() {
        assert_eq!(decode_body(b"<urlset/>").unwrap(), "<urlset/>");
    }
}
