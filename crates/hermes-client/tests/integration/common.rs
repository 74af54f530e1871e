use std::time::Duration;

use hermes_core::job::{BatchConfig, ExistingOutputPolicy};

/// A product page in the shape the extractor expects: markup for most
/// fields, the price only in the embedded payload.
pub fn product_page(id: u32, title: &str, price: f64) -> String {
    format!(
        r#"<html lang="en"><head>
        <meta property="og:title" content="{title}">
        <meta property="og:image" content="https://img.shop.test/{id}.jpg">
        </head><body>
        <div class="breadcrumb"><a href="/">Home</a><a href="/c/lighting">Lighting</a></div>
        <h1 data-pl="product-title">{title}</h1>
        <div class="overview-rating-average">4.6</div>
        <span class="review-count">210 reviews</span>
        <div class="product-specs"><table><tr><td>Material</td><td>Steel</td></tr></table></div>
        <span class="store-name">Bright Store</span>
        <script>window.runParams = {{"data": {{"priceModule": {{"minActivityAmount": {{"value": {price}, "currency": "USD"}}}}}}}};</script>
        </body></html>"#
    )
}

pub fn address(id: u32) -> String {
    format!("https://shop.test/item/{id}.html")
}

/// Fast config for tests: no rate limit, tiny backoff.
pub fn test_config(output_dir: &std::path::Path, on_existing: ExistingOutputPolicy) -> BatchConfig {
    BatchConfig::new(output_dir, on_existing)
        .with_concurrency(2)
        .with_rate_limit(Duration::ZERO)
        .with_fetch_timeout(Duration::from_secs(5))
        .with_max_retries(2)
        .with_retry_backoff(Duration::from_millis(5))
}
