//! Error types for the currency exchange service.

use thiserror::Error;

/// Main error type for service-level operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exchange rate fetch errors
    #[error("Rate fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a [`RateFetcher`](crate::rates::RateFetcher).
///
/// Any of these leaves the current rate table untouched.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure, including timeouts
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The quote provider answered with a non-success status
    #[error("quote provider returned status {0}")]
    Status(u16),

    /// The body was not valid JSON
    #[error("invalid JSON from quote provider: {0}")]
    Decode(#[from] serde_json::Error),

    /// The document has no `rates` object
    #[error("response has no 'rates' object")]
    MissingRates,

    /// The `rates` object is empty
    #[error("response contains no rates")]
    EmptyRates,

    /// A rate is not a positive decimal number
    #[error("invalid rate for {code}: {value}")]
    InvalidRate { code: String, value: String },

    /// A currency key is not a three-letter code
    #[error("invalid currency code: {0:?}")]
    InvalidCode(String),

    /// Two keys name the same currency once case is ignored
    #[error("currency {0} is listed more than once")]
    DuplicateCode(String),
}

/// Result type alias for service-level operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
