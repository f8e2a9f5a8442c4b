//! Standard product extractor
//!
//! JSON-LD `Product` data first, then Open Graph / microdata meta tags and
//! a few DOM selectors for whatever the structured data left empty.

use anyhow::{Result, anyhow};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::domain::gtin::clean_gtin;
use crate::domain::page::{FetchError, FetchedPage};
use crate::domain::product::Product;
use crate::domain::site::ProductExtractor;

/// CSS selectors used by the DOM fallback
#[derive(Debug, Clone)]
pub struct ExtractorSelectors {
    pub json_ld: String,
    pub title: String,
    pub price: String,
    pub currency: String,
    pub original_price: String,
    pub image: String,
    pub brand: String,
    pub gtin: String,
    pub availability: String,
}

impl Default for ExtractorSelectors {
    fn default() -> Self {
        Self {
            json_ld: r#"script[type="application/ld+json"]"#.to_string(),
            title: r#"meta[property="og:title"], meta[name="twitter:title"]"#.to_string(),
            price: r#"meta[property="product:price:amount"], meta[property="og:price:amount"], [itemprop="price"]"#
                .to_string(),
            currency: r#"meta[property="product:price:currency"], meta[property="og:price:currency"], [itemprop="priceCurrency"]"#
                .to_string(),
            original_price: r#"meta[property="product:original_price:amount"]"#.to_string(),
            image: r#"meta[property="og:image"], [itemprop="image"]"#.to_string(),
            brand: r#"meta[property="product:brand"], [itemprop="brand"]"#.to_string(),
            gtin: r#"[itemprop="gtin13"], [itemprop="gtin"], [itemprop="gtin8"], [itemprop="gtin12"], [itemprop="gtin14"]"#
                .to_string(),
            availability: r#"meta[property="product:availability"], [itemprop="availability"]"#.to_string(),
        }
    }
}

struct CompiledSelectors {
    json_ld: Selector,
    title: Selector,
    h1: Selector,
    price: Selector,
    currency: Selector,
    original_price: Selector,
    image: Selector,
    brand: Selector,
    gtin: Selector,
    availability: Selector,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("Invalid selector '{}': {}", selector, e))
}

/// JSON-LD → meta → DOM 순서의 표준 추출기
pub struct StandardProductExtractor {
    selectors: CompiledSelectors,
}

impl StandardProductExtractor {
    pub fn new() -> Result<Self> {
        Self::with_selectors(&ExtractorSelectors::default())
    }

    pub fn with_selectors(config: &ExtractorSelectors) -> Result<Self> {
        Ok(Self {
            selectors: CompiledSelectors {
                json_ld: compile(&config.json_ld)?,
                title: compile(&config.title)?,
                h1: compile("h1")?,
                price: compile(&config.price)?,
                currency: compile(&config.currency)?,
                original_price: compile(&config.original_price)?,
                image: compile(&config.image)?,
                brand: compile(&config.brand)?,
                gtin: compile(&config.gtin)?,
                availability: compile(&config.availability)?,
            },
        })
    }

    /// Extract product facts from raw HTML. `url` becomes `Product::url`.
    pub fn extract_html(&self, url: &str, html: &str) -> Product {
        let document = Html::parse_document(html);
        let mut product = Product::new(url);

        for script in document.select(&self.selectors.json_ld) {
            let text = script.text().collect::<String>();
            let Ok(json) = serde_json::from_str::<Value>(text.trim()) else {
                debug!("Skipping unparsable JSON-LD block on {}", url);
                continue;
            };
            if let Some(node) = find_product_node(&json) {
                apply_json_ld(node, &mut product);
                break;
            }
        }

        self.apply_fallbacks(&document, &mut product);
        product
    }

    fn apply_fallbacks(&self, document: &Html, product: &mut Product) {
        let s = &self.selectors;

        if product.name.is_none() {
            product.name = first_value(document, &s.title).or_else(|| first_value(document, &s.h1));
        }
        if product.price.is_none() {
            product.price = first_value(document, &s.price).as_deref().and_then(parse_price);
        }
        if product.currency.is_none() {
            product.currency = first_value(document, &s.currency).map(|c| c.to_uppercase());
        }
        if product.original_price.is_none() {
            product.original_price = first_value(document, &s.original_price)
                .as_deref()
                .and_then(parse_price);
        }
        if product.image_url.is_none() {
            product.image_url = first_value(document, &s.image);
        }
        if product.brand.is_none() {
            product.brand = first_value(document, &s.brand);
        }
        if product.gtin.is_none() {
            product.gtin = document
                .select(&s.gtin)
                .filter_map(|el| element_value(&el))
                .find_map(|raw| clean_gtin(&raw));
        }
        if product.in_stock.is_none() {
            product.in_stock = first_value(document, &s.availability)
                .as_deref()
                .and_then(parse_availability);
        }
    }
}

impl ProductExtractor for StandardProductExtractor {
    fn extract(&self, page: &FetchedPage) -> Result<Product, FetchError> {
        let product = self.extract_html(&page.final_url, &page.body);
        if product.is_empty() {
            return Err(FetchError::Extraction(format!(
                "No product data found on {}",
                page.final_url
            )));
        }
        Ok(product)
    }
}

/// `content`, `href`, `src` or text of an element, trimmed, non-empty
fn element_value(el: &scraper::ElementRef<'_>) -> Option<String> {
    let attrs = el.value();
    attrs
        .attr("content")
        .or_else(|| attrs.attr("href"))
        .or_else(|| attrs.attr("src"))
        .map(str::to_string)
        .or_else(|| Some(el.text().collect::<String>()))
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|v| !v.is_empty())
}

fn first_value(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).find_map(|el| element_value(&el))
}

fn is_product_type(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == "Product" || t.ends_with("/Product"),
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    }
}

/// Depth-first search through arrays, `@graph` and nested objects
fn find_product_node(json: &Value) -> Option<&Value> {
    match json {
        Value::Array(items) => items.iter().find_map(find_product_node),
        Value::Object(map) => {
            if is_product_type(json) {
                return Some(json);
            }
            if let Some(graph) = map.get("@graph") {
                if let Some(found) = find_product_node(graph) {
                    return Some(found);
                }
            }
            map.get("mainEntity").and_then(find_product_node)
        }
        _ => None,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("name").or_else(|| map.get("url")).and_then(text_of),
        Value::Array(items) => items.iter().find_map(text_of),
        _ => None,
    }
}

fn price_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn apply_json_ld(node: &Value, product: &mut Product) {
    product.name = node.get("name").and_then(text_of);
    product.brand = node.get("brand").and_then(text_of);
    product.image_url = node.get("image").and_then(text_of);
    product.gtin = ["gtin13", "gtin", "gtin14", "gtin12", "gtin8", "ean"]
        .iter()
        .filter_map(|key| node.get(*key).and_then(text_of))
        .find_map(|raw| clean_gtin(&raw));

    let offer = match node.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        other => other,
    };
    let Some(offer) = offer else {
        return;
    };

    let aggregate = offer.get("@type").and_then(Value::as_str) == Some("AggregateOffer");
    let listed = if aggregate {
        offer.get("lowPrice").or_else(|| offer.get("price"))
    } else {
        offer.get("price")
    };
    product.price = listed.and_then(price_of).or_else(|| {
        offer
            .get("priceSpecification")
            .and_then(|spec| spec.get("price"))
            .and_then(price_of)
    });
    product.currency = offer
        .get("priceCurrency")
        .and_then(text_of)
        .map(|c| c.to_uppercase());
    product.in_stock = offer
        .get("availability")
        .and_then(text_of)
        .as_deref()
        .and_then(parse_availability);
}

/// schema.org availability → stock flag
pub fn parse_availability(raw: &str) -> Option<bool> {
    let value = raw.rsplit('/').next().unwrap_or(raw).to_ascii_lowercase();
    match value.as_str() {
        "instock" | "in stock" | "in_stock" | "limitedavailability" | "onlineonly" | "instoreonly" => Some(true),
        "outofstock" | "out of stock" | "out_of_stock" | "soldout" | "discontinued" => Some(false),
        _ => None,
    }
}

/// Parse a display price such as `"€ 1.299,00"`, `"$1,299.00"` or `"12,50"`.
///
/// With both separators present the last one is the decimal point. A lone
/// separator followed by exactly three digits is a thousands separator.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ','))
        .collect();
    // "Rs. 1,299" / "1.299,-"
    let cleaned = cleaned.trim_matches(|c| matches!(c, '.' | ','));
    if !cleaned.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let decimal = match (last_dot, last_comma) {
        (Some(d), Some(c)) => Some(d.max(c)),
        (Some(i), None) | (None, Some(i)) => {
            let sep = cleaned.as_bytes()[i];
            let repeated = cleaned.bytes().filter(|b| *b == sep).count() > 1;
            let digits_after = cleaned.len() - i - 1;
            (!repeated && digits_after != 3).then_some(i)
        }
        (None, None) => None,
    };

    let normalized: String = cleaned
        .char_indices()
        .filter_map(|(i, c)| match c {
            '.' | ',' if Some(i) == decimal => Some('.'),
            '.' | ',' => None,
            digit => Some(digit),
        })
        .collect();

    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn extractor() -> StandardProductExtractor {
        StandardProductExtractor::new().unwrap()
    }

    #[rstest]
    #[case("€ 1.299,00", Some(1299.0))]
    #[case("$1,299.00", Some(1299.0))]
    #[case("12,50", Some(12.5))]
    #[case("19.99", Some(19.99))]
    #[case("1.299", Some(1299.0))]
    #[case("2 499 kr", Some(2499.0))]
    #[case("1.234.567", Some(1_234_567.0))]
    #[case("Rs. 1,299", Some(1299.0))]
    #[case("price on request", None)]
    fn parses_display_prices(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_price(raw), expected);
    }

    #[test]
    fn reads_json_ld_product_inside_graph() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@context":"https://schema.org","@graph":[
                {"@type":"BreadcrumbList"},
                {"@type":"Product","name":"Espresso Machine","brand":{"@type":"Brand","name":"Brewco"},
                 "image":["https://shop.test/img/1.jpg","https://shop.test/img/2.jpg"],
                 "gtin13":"4006381333931",
                 "offers":{"@type":"Offer","price":"249.90","priceCurrency":"eur",
                           "availability":"https://schema.org/InStock"}}
            ]}</script></head><body></body></html>"#;

        let product = extractor().extract_html("https://shop.test/p/1", html);
        assert_eq!(product.name.as_deref(), Some("Espresso Machine"));
        assert_eq!(product.brand.as_deref(), Some("Brewco"));
        assert_eq!(product.image_url.as_deref(), Some("https://shop.test/img/1.jpg"));
        assert_eq!(product.gtin.as_deref(), Some("4006381333931"));
        assert_eq!(product.price, Some(249.9));
        assert_eq!(product.currency.as_deref(), Some("EUR"));
        assert_eq!(product.in_stock, Some(true));
    }

    #[test]
    fn aggregate_offer_uses_low_price() {
        let html = r#"<script type="application/ld+json">[{"@type":"Product","name":"Kettle",
            "offers":[{"@type":"AggregateOffer","lowPrice":39,"highPrice":59,"priceCurrency":"USD",
            "availability":"OutOfStock"}]}]</script>"#;

        let product = extractor().extract_html("https://shop.test/p/2", html);
        assert_eq!(product.price, Some(39.0));
        assert_eq!(product.in_stock, Some(false));
    }

    #[test]
    fn falls_back_to_meta_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="Desk Lamp">
            <meta property="product:price:amount" content="34,95">
            <meta property="product:price:currency" content="EUR">
            <meta property="product:original_price:amount" content="49,95">
            <meta property="og:image" content="https://shop.test/lamp.jpg">
            </head><body><span itemprop="gtin13">4006381 333931</span></body></html>"#;

        let product = extractor().extract_html("https://shop.test/p/3", html);
        assert_eq!(product.name.as_deref(), Some("Desk Lamp"));
        assert_eq!(product.price, Some(34.95));
        assert_eq!(product.original_price, Some(49.95));
        assert_eq!(product.currency.as_deref(), Some("EUR"));
        assert_eq!(product.image_url.as_deref(), Some("https://shop.test/lamp.jpg"));
        assert_eq!(product.gtin.as_deref(), Some("4006381333931"));
    }

    #[test]
    fn invalid_gtin_is_dropped() {
        let html = r#"<script type="application/ld+json">{"@type":"Product","name":"Mug","gtin13":"4006381333932"}</script>"#;
        assert_eq!(extractor().extract_html("https://shop.test/p/4", html).gtin, None);
    }

    #[test]
    fn empty_page_is_an_extraction_error() {
        let page = FetchedPage::ok("https://shop.test/p/5", "<html><body><p>Not found</p></body></html>");
        assert!(matches!(extractor().extract(&page), Err(FetchError::Extraction(_))));
    }

    #[test]
    fn broken_json_ld_does_not_hide_meta_data() {
        let html = r#"<script type="application/ld+json">{not json</script>
            <meta property="og:title" content="Chair">"#;
        let page = FetchedPage::ok("https://shop.test/p/6", html);
        assert_eq!(extractor().extract(&page).unwrap().name.as_deref(), Some("Chair"));
    }
}
