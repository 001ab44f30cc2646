//! Quote client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Unexpected status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Invalid price for {key}: {value}")]
    InvalidPrice { key: String, value: f64 },
}

pub type QuoteResult<T> = Result<T, QuoteError>;
