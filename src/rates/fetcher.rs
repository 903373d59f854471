//! Exchange rate sources.

use async_trait::async_trait;
use rust_decimal::prelude::*;
use std::time::Duration;
use tracing::{debug, trace};

use super::table::RateMap;
use crate::error::FetchError;
use crate::processor::is_currency_code;

/// Default quote provider endpoint; the base currency is appended.
pub const DEFAULT_API_URL: &str = "https://api.exchangerate-api.com/v4/latest";

/// A source of complete exchange rate tables.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    /// Fetch rates for every known currency, quoted against `base`.
    async fn fetch(&self, base: &str) -> Result<RateMap, FetchError>;
}

/// Fetches rates from a JSON quote provider over HTTP.
///
/// The provider must answer `GET <api_url>/<BASE>` with a document holding a
/// `rates` object of currency code to number.
#[derive(Debug, Clone)]
pub struct HttpRateFetcher {
    http: reqwest::Client,
    api_url: String,
}

impl HttpRateFetcher {
    /// Create a fetcher for `api_url` with a per-request timeout.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    fn url_for(&self, base: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), base)
    }
}

#[async_trait]
impl RateFetcher for HttpRateFetcher {
    async fn fetch(&self, base: &str) -> Result<RateMap, FetchError> {
        let url = self.url_for(base);
        debug!(url = %url, "Fetching exchange rates");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_rates(&body)
    }
}

/// Parse a quote provider document into a complete rate map.
///
/// Any malformed entry fails the whole document; a partial table is never
/// returned.
pub fn parse_rates(body: &str) -> Result<RateMap, FetchError> {
    let document: serde_json::Value = serde_json::from_str(body)?;
    let rates = document
        .get("rates")
        .and_then(|r| r.as_object())
        .ok_or(FetchError::MissingRates)?;

    if rates.is_empty() {
        return Err(FetchError::EmptyRates);
    }

    let mut map = RateMap::with_capacity(rates.len());
    for (code, value) in rates {
        if !is_currency_code(code) {
            return Err(FetchError::InvalidCode(code.clone()));
        }
        let rate = parse_rate(value).ok_or_else(|| FetchError::InvalidRate {
            code: code.clone(),
            value: value.to_string(),
        })?;
        trace!(code = %code, rate = %rate, "Parsed rate");
        let upper = code.to_ascii_uppercase();
        if map.insert(upper.clone(), rate).is_some() {
            return Err(FetchError::DuplicateCode(upper));
        }
    }

    Ok(map)
}

fn parse_rate(value: &serde_json::Value) -> Option<Decimal> {
    let number = match value {
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let rate = Decimal::from_str(&number)
        .or_else(|_| Decimal::from_scientific(&number))
        .ok()?;
    (rate > Decimal::ZERO).then_some(rate)
}

#[cfg(test)]
pub(crate) use test_support::StaticRateFetcher;


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection and never answer it; returns the base URL.
    async fn serve_silent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        format!("http://{}/v4/latest", addr)
    }

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        format!("http://{}/v4/latest", addr)
    }

    #[test]
    fn test_parse_rates() {
        let body = r#"{"base":"USD","rates":{"USD":1,"EUR":0.92,"JPY":149.5}}"#;
        let rates = parse_rates(body).unwrap();

        assert_eq!(rates.len(), 3);
        assert_eq!(rates["USD"], Decimal::ONE);
        assert_eq!(rates["EUR"], Decimal::from_str("0.92").unwrap());
        assert_eq!(rates["JPY"], Decimal::from_str("149.5").unwrap());
    }

    #[test]
    fn test_parse_rates_scientific_notation() {
        let rates = parse_rates(r#"{"rates":{"BTC":1.5e-5}}"#).unwrap();
        assert_eq!(rates["BTC"], Decimal::from_str("0.000015").unwrap());
    }

    #[test]
    fn test_parse_rates_missing_rates() {
        let err = parse_rates(r#"{"base":"USD"}"#).unwrap_err();
        assert!(matches!(err, FetchError::MissingRates));
    }

    #[test]
    fn test_parse_rates_empty() {
        let err = parse_rates(r#"{"rates":{}}"#).unwrap_err();
        assert!(matches!(err, FetchError::EmptyRates));
    }

    #[test]
    fn test_parse_rates_rejects_non_positive() {
        let err = parse_rates(r#"{"rates":{"USD":1,"EUR":0}}"#).unwrap_err();
        assert!(matches!(err, FetchError::InvalidRate { ref code, .. } if code == "EUR"));

        assert!(parse_rates(r#"{"rates":{"EUR":-0.5}}"#).is_err());
        assert!(parse_rates(r#"{"rates":{"EUR":"0.9"}}"#).is_err());
    }

    #[test]
    fn test_parse_rates_rejects_bad_code() {
        let err = parse_rates(r#"{"rates":{"EURO":0.9}}"#).unwrap_err();
        assert!(matches!(err, FetchError::InvalidCode(_)));
    }

    #[test]
    fn test_parse_rates_rejects_case_duplicates() {
        let err = parse_rates(r#"{"rates":{"usd":1,"USD":1}}"#).unwrap_err();
        assert!(matches!(err, FetchError::DuplicateCode(ref code) if code == "USD"));

        let err = parse_rates(r#"{"rates":{"EUR":0.92,"eur":0.5,"GBP":0.79}}"#).unwrap_err();
        assert!(matches!(err, FetchError::DuplicateCode(_)));
    }

    #[test]
    fn test_parse_rates_invalid_json() {
        let err = parse_rates("<html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_http_fetch_success() {
        let url = serve_once("200 OK", r#"{"rates":{"USD":1,"EUR":0.92}}"#).await;
        let fetcher = HttpRateFetcher::new(url, Duration::from_secs(5)).unwrap();

        let rates = fetcher.fetch("USD").await.unwrap();
        assert_eq!(rates.len(), 2);
    }

    #[tokio::test]
    async fn test_http_fetch_non_success_status() {
        let url = serve_once("500 Internal Server Error", "{}").await;
        let fetcher = HttpRateFetcher::new(url, Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch("USD").await.unwrap_err();
        assert!(matches!(err, FetchError::Status(500)));
    }

    #[tokio::test]
    async fn test_http_fetch_missing_rates() {
        let url = serve_once("200 OK", r#"{"base":"USD","date":"2024-01-01"}"#).await;
        let fetcher = HttpRateFetcher::new(url, Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch("USD").await.unwrap_err();
        assert!(matches!(err, FetchError::MissingRates));
    }

    #[tokio::test]
    async fn test_http_fetch_times_out() {
        let url = serve_silent().await;
        let fetcher = HttpRateFetcher::new(url, Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        let err = fetcher.fetch("USD").await.unwrap_err();

        assert!(matches!(err, FetchError::Http(ref e) if e.is_timeout()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_url_for_trims_trailing_slash() {
        let fetcher = HttpRateFetcher::new("http://example.test/latest/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(fetcher.url_for("EUR"), "http://example.test/latest/EUR");
    }
}
