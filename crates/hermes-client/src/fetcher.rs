use std::time::Duration;

use hermes_core::error::{AppError, FetchError};
use hermes_core::models::Document;
use hermes_core::traits::Fetcher;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Proxy, StatusCode};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Markers of an anti-bot interstitial served in place of the product page.
const CHALLENGE_MARKERS: &[&str] = &[
    "/_____tmd_____/punish",
    "x5secdata",
    "baxia-punish",
    "nocaptcha",
    "slide to verify",
    "please slide to verify",
    "captcha-verify",
    r#"id="captcha""#,
];

/// Settings handed opaquely to the fetch driver.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub user_agent: String,
    /// Proxy endpoint, e.g. `http://127.0.0.1:8080` or `socks5://host:1080`.
    pub proxy: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
        }
    }
}

/// HTTP fetcher using reqwest.
///
/// Returns the raw HTML as served; pages that build their content client-side
/// need the `browser` feature's `BrowserFetcher` instead.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_options(&FetchOptions::default())
    }

    pub fn with_options(options: &FetchOptions) -> Result<Self, AppError> {
        let mut builder = Client::builder().user_agent(&options.user_agent);
        builder = match &options.proxy {
            Some(proxy) => builder.proxy(
                Proxy::all(proxy)
                    .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{proxy}': {e}")))?,
            ),
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client error: {e}")))?;

        Ok(Self { client })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, address: &str, timeout: Duration) -> Result<Document, FetchError> {
        let url = validate_address(address)?;

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(address, &e))?;

        let status = response.status();
        if let Some(err) = classify_status(address, status) {
            return Err(err);
        }

        let final_url = response.url().to_string();
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && !content_type.contains("html")
            && !content_type.contains("xml")
        {
            return Err(FetchError::malformed(
                address,
                format!("unexpected content type {content_type}"),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| classify_request_error(address, &e))?;
        classify_body(address, &html)?;

        tracing::debug!(%address, %final_url, bytes = html.len(), "Fetched page");
        Ok(Document::new(address, html).with_final_url(final_url))
    }
}

/// Only absolute `http`/`https` addresses can be fetched.
pub fn validate_address(address: &str) -> Result<Url, FetchError> {
    let url = Url::parse(address)
        .map_err(|e| FetchError::malformed(address, format!("invalid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(FetchError::malformed(
            address,
            format!("URL scheme '{scheme}' is not allowed (only http/https)"),
        )),
    }
}

fn classify_request_error(address: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(address, e.to_string())
    } else if e.is_builder() {
        FetchError::malformed(address, e.to_string())
    } else if e.is_connect() {
        FetchError::network(address, format!("Connection failed: {e}"))
    } else {
        FetchError::network(address, e.to_string())
    }
}

/// `None` for a success status.
pub fn classify_status(address: &str, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {}", status.as_u16());
    Some(match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::blocked(address, message)
        }
        s if s.is_server_error() => FetchError::network(address, message),
        _ => FetchError::malformed(address, message),
    })
}

/// Reject empty bodies and anti-bot challenge pages.
pub fn classify_body(address: &str, html: &str) -> Result<(), FetchError> {
    if html.trim().is_empty() {
        return Err(FetchError::malformed(address, "empty body"));
    }
    let lowered = html.to_lowercase();
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return Err(FetchError::blocked(
            address,
            format!("challenge page detected ({marker})"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::error::FetchErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a loopback port.
    async fn serve_once(status_line: &str, content_type: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/item/1.html")
    }

    #[test]
    fn test_classify_status() {
        let a = "https://shop.test/item/1.html";
        assert!(classify_status(a, StatusCode::OK).is_none());
        assert_eq!(
            classify_status(a, StatusCode::FORBIDDEN).unwrap().kind,
            FetchErrorKind::Blocked
        );
        assert_eq!(
            classify_status(a, StatusCode::TOO_MANY_REQUESTS).unwrap().kind,
            FetchErrorKind::Blocked
        );
        assert_eq!(
            classify_status(a, StatusCode::BAD_GATEWAY).unwrap().kind,
            FetchErrorKind::NetworkFailure
        );
        assert_eq!(
            classify_status(a, StatusCode::NOT_FOUND).unwrap().kind,
            FetchErrorKind::Malformed
        );
    }

    #[test]
    fn test_classify_body() {
        let a = "https://shop.test/item/1.html";
        assert!(classify_body(a, "<html><h1>Lamp</h1></html>").is_ok());
        assert_eq!(classify_body(a, "  \n").unwrap_err().kind, FetchErrorKind::Malformed);

        let challenge = r#"<html><script src="/_____tmd_____/punish?x5secdata=abc"></script></html>"#;
        assert_eq!(
            classify_body(a, challenge).unwrap_err().kind,
            FetchErrorKind::Blocked
        );
        assert_eq!(
            classify_body(a, "<div>Please slide to verify</div>").unwrap_err().kind,
            FetchErrorKind::Blocked
        );
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("https://shop.test/item/1.html").is_ok());
        assert_eq!(
            validate_address("not a url").unwrap_err().kind,
            FetchErrorKind::Malformed
        );
        let err = validate_address("file:///etc/passwd").unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Malformed);
        assert!(err.message.contains("not allowed"));
    }

    #[tokio::test]
    async fn test_fetch_returns_document() {
        let address = serve_once("200 OK", "text/html; charset=utf-8", "<html><h1>Lamp</h1></html>").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let doc = fetcher.fetch(&address, Duration::from_secs(5)).await.unwrap();
        assert_eq!(doc.address, address);
        assert_eq!(doc.final_url, address);
        assert!(doc.html.contains("Lamp"));
    }

    #[tokio::test]
    async fn test_fetch_classifies_forbidden_as_blocked() {
        let address = serve_once("403 Forbidden", "text/html", "denied").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let err = fetcher.fetch(&address, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Blocked);
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_html() {
        let address = serve_once("200 OK", "application/pdf", "%PDF-1.4").await;
        let fetcher = ReqwestFetcher::new().unwrap();

        let err = fetcher.fetch(&address, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/slow"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_is_network_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::NetworkFailure);
    }
}
