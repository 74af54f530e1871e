/// Smoke-test for `BrowserFetcher` + `ProductExtractor`.
///
/// Launches a headless Chromium, renders one product page, and prints the
/// extracted record and any field warnings.
///
/// Run with:
///   cargo run -p hermes-client --example browser_smoke --features browser -- <product-url>
use std::time::Duration;

use hermes_client::{BrowserFetcher, FetchOptions, ProductExtractor};
use hermes_core::traits::{Extractor, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());

    println!("Launching headless browser…");
    let fetcher = BrowserFetcher::launch(&FetchOptions::default()).await?;

    println!("Fetching {url} …");
    let doc = fetcher.fetch(&url, Duration::from_secs(60)).await?;
    assert!(
        doc.html.len() > 500,
        "HTML suspiciously short ({} bytes)",
        doc.html.len()
    );
    println!("OK, got {} bytes of rendered HTML from {}", doc.html.len(), doc.final_url);

    let extraction = ProductExtractor::new().extract(&doc);
    println!("{}", serde_json::to_string_pretty(&extraction.record)?);
    for warning in &extraction.warnings {
        println!("warning: {} {} ({})", warning.field, warning.kind, warning.detail);
    }
    Ok(())
}
