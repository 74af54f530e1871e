use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use hermes_core::error::{AppError, FetchError};
use hermes_core::models::Document;
use hermes_core::traits::Fetcher;

use crate::fetcher::{FetchOptions, classify_body, validate_address};

/// Pause after scrolling so lazy-loaded galleries and reviews can render.
const SCROLL_SETTLE: Duration = Duration::from_millis(1500);

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Unlike [`super::ReqwestFetcher`], this renders JavaScript before returning
/// the HTML, so prices and galleries filled in client-side are present.
///
/// A single Chromium process is shared across all clones of this struct;
/// each [`Fetcher::fetch`] call opens a new tab, scrolls it to trigger lazy
/// loading, grabs the rendered HTML, and closes the tab.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use hermes_client::{BrowserFetcher, FetchOptions};
/// use hermes_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::launch(&FetchOptions::default()).await?;
/// let doc = fetcher.fetch("https://example.com", Duration::from_secs(30)).await?;
/// println!("{}", &doc.html[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
}

impl BrowserFetcher {
    /// Launches a headless Chromium with the configured user agent and proxy.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
    /// or the default locations checked by `chromiumoxide`.
    pub async fn launch(options: &FetchOptions) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        builder = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", options.user_agent));
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let config = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
        })
    }

    /// Snap-packaged Chromium ships a wrapper that rejects headless flags, so
    /// the real binary inside the snap is preferred over it.
    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    async fn render(page: &Page, address: &str) -> Result<(String, Option<String>), FetchError> {
        page.find_element("body")
            .await
            .map_err(|e| FetchError::malformed(address, format!("Page did not render body: {e}")))?;

        for script in [
            "window.scrollTo(0, document.body.scrollHeight)",
            "window.scrollTo(0, 0)",
        ] {
            if let Err(e) = page.evaluate(script).await {
                tracing::debug!(%address, error = %e, "Scroll failed");
            }
            tokio::time::sleep(SCROLL_SETTLE).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::network(address, format!("Failed to read page content: {e}")))?;
        let final_url = page.url().await.ok().flatten();

        Ok((html, final_url))
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Document, FetchError> {
        validate_address(address)?;

        let result = tokio::time::timeout(timeout, async {
            let page = self.browser.new_page(address).await.map_err(|e| {
                FetchError::network(address, format!("Failed to navigate: {e}"))
            })?;

            let rendered = Self::render(&page, address).await;

            if let Err(e) = page.close().await {
                tracing::debug!(%address, error = %e, "Failed to close tab");
            }
            rendered
        })
        .await;

        let (html, final_url) = match result {
            Ok(inner) => inner?,
            Err(_) => {
                return Err(FetchError::timeout(
                    address,
                    format!("no rendered page after {}s", timeout.as_secs_f64()),
                ));
            }
        };
        classify_body(address, &html)?;

        let doc = Document::new(address, html);
        Ok(match final_url {
            Some(url) => doc.with_final_url(url),
            None => doc,
        })
    }
}
