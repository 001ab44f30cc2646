//! HTTP client for the initial price snapshot.

use crate::error::{QuoteError, QuoteResult};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stockfeed_core::BoxFuture;
use tracing::{debug, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the current price for a key.
pub trait QuoteSource: Send + Sync {
    /// Fetch the current price. `Ok(None)` means the source has no price.
    fn fetch_price<'a>(&'a self, key: &'a str) -> BoxFuture<'a, QuoteResult<Option<f64>>>;
}

/// Arc wrapper for QuoteSource trait objects.
pub type DynQuoteSource = Arc<dyn QuoteSource>;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    price: Option<f64>,
}

/// REST client for `GET <root>/<path>/<key>`.
pub struct QuoteClient {
    client: Client,
    base_url: String,
}

impl QuoteClient {
    /// Create a new quote client.
    ///
    /// # Arguments
    /// * `api_root` - Scheme and authority (e.g., "https://localhost:7216")
    /// * `path` - Resource prefix (e.g., "api/stocks")
    pub fn new(api_root: &str, path: &str) -> QuoteResult<Self> {
        Self::with_timeout(api_root, path, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_root: &str, path: &str, timeout: Duration) -> QuoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: join_url(api_root, path),
        })
    }

    /// URL of the price resource for `key`.
    pub fn price_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn fetch(&self, key: &str) -> QuoteResult<Option<f64>> {
        let url = self.price_url(key);
        debug!(%url, "Fetching initial price");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuoteError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(key, "No price available");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(QuoteError::Status {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        let body: PriceResponse = response
            .json()
            .await
            .map_err(|e| QuoteError::HttpClient(format!("Failed to parse response: {e}")))?;

        interpret_price(key, body.price)
    }
}

impl QuoteSource for QuoteClient {
    fn fetch_price<'a>(&'a self, key: &'a str) -> BoxFuture<'a, QuoteResult<Option<f64>>> {
        Box::pin(self.fetch(key))
    }
}

/// Missing and zero prices mean "no price"; negative or non-finite ones are errors.
fn interpret_price(key: &str, price: Option<f64>) -> QuoteResult<Option<f64>> {
    match price {
        None => Ok(None),
        Some(value) if value == 0.0 => Ok(None),
        Some(value) if !value.is_finite() || value < 0.0 => {
            warn!(key, value, "Rejecting invalid price");
            Err(QuoteError::InvalidPrice {
                key: key.to_string(),
                value,
            })
        }
        Some(value) => Ok(Some(value)),
    }
}

fn join_url(api_root: &str, path: &str) -> String {
    let root = api_root.trim_end_matches('/');
    let path = path.trim_matches('/');
    if path.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{path}")
    }
}

/// Mock quote source for testing.
#[derive(Debug, Default)]
pub struct MockQuoteSource {
    /// Prices by key; keys without an entry resolve to `None`.
    prices: Mutex<HashMap<String, f64>>,
    /// Keys whose fetch fails.
    failing: Mutex<Vec<String>>,
    /// Recorded fetches, in call order.
    requests: Mutex<Vec<String>>,
}

impl MockQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, key: &str, price: f64) {
        self.prices.lock().insert(key.to_string(), price);
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().push(key.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl QuoteSource for MockQuoteSource {
    fn fetch_price<'a>(&'a self, key: &'a str) -> BoxFuture<'a, QuoteResult<Option<f64>>> {
        Box::pin(async move {
            self.requests.lock().push(key.to_string());
            if self.failing.lock().iter().any(|k| k == key) {
                return Err(QuoteError::HttpClient("mock failure".to_string()));
            }
            let price = self.prices.lock().get(key).copied();
            interpret_price(key, price)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_url_building() {
        let client = QuoteClient::new("https://localhost:7216/", "/api/stocks/").unwrap();
        assert_eq!(
            client.price_url("AAPL"),
            "https://localhost:7216/api/stocks/AAPL"
        );
    }

    #[test]
    fn test_interpret_price() {
        assert_eq!(interpret_price("A", None).unwrap(), None);
        assert_eq!(interpret_price("A", Some(0.0)).unwrap(), None);
        assert_eq!(interpret_price("A", Some(12.5)).unwrap(), Some(12.5));
        assert!(matches!(
            interpret_price("A", Some(f64::NAN)),
            Err(QuoteError::InvalidPrice { .. })
        ));
        assert!(interpret_price("A", Some(-1.0)).is_err());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let root = serve_once("200 OK", r#"{"price":150.25}"#).await;
        let client = QuoteClient::new(&root, "api/stocks").unwrap();
        assert_eq!(client.fetch_price("AAPL").await.unwrap(), Some(150.25));
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_absence() {
        let root = serve_once("404 Not Found", "{}").await;
        let client = QuoteClient::new(&root, "api/stocks").unwrap();
        assert_eq!(client.fetch_price("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_null_price_is_absence() {
        let root = serve_once("200 OK", r#"{"price":null}"#).await;
        let client = QuoteClient::new(&root, "api/stocks").unwrap();
        assert_eq!(client.fetch_price("AAPL").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let root = serve_once("500 Internal Server Error", "{}").await;
        let client = QuoteClient::new(&root, "api/stocks").unwrap();
        assert!(matches!(
            client.fetch_price("AAPL").await,
            Err(QuoteError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mock = MockQuoteSource::new();
        mock.set_price("AAPL", 10.0);
        mock.fail("BAD");

        assert_eq!(mock.fetch_price("AAPL").await.unwrap(), Some(10.0));
        assert_eq!(mock.fetch_price("MSFT").await.unwrap(), None);
        assert!(mock.fetch_price("BAD").await.is_err());
        assert_eq!(mock.requests().len(), 3);
    }
}
