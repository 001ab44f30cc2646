//! Price update parsing.
//!
//! The hub pushes prices as a `ReceiveStockPriceUpdate` invocation whose
//! single argument is `{"ticker": "AAPL", "price": 150.25}`. Older hubs
//! use `key`/`value` instead, and some send the price as a string.

use crate::error::{FeedError, FeedResult};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use stockfeed_core::Key;
use stockfeed_ws::Invocation;
use tracing::trace;

/// Invocation target carrying price pushes.
pub const PRICE_UPDATE_TARGET: &str = "ReceiveStockPriceUpdate";

/// Typed price push.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub key: Key,
    /// Not validated here; the registry rejects non-finite values.
    pub value: f64,
}

#[derive(Debug, Deserialize)]
struct RawPriceUpdate {
    #[serde(alias = "key", alias = "symbol")]
    ticker: String,
    #[serde(alias = "value")]
    price: RawPrice,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrice {
    Number(f64),
    Text(String),
}

impl RawPrice {
    fn to_f64(&self) -> FeedResult<f64> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| FeedError::ParseError(format!("invalid price: {text}"))),
        }
    }
}

/// Parser statistics.
#[derive(Debug, Default)]
pub struct ParserStats {
    pub parsed: AtomicU64,
    pub rejected: AtomicU64,
}

impl ParserStats {
    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Turns hub invocations into price updates.
#[derive(Debug)]
pub struct MessageParser {
    target: String,
    stats: ParserStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::with_target(PRICE_UPDATE_TARGET)
    }

    /// Parser for a hub that pushes prices under a different method name.
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            stats: ParserStats::default(),
        }
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Parse a server invocation.
    pub fn parse(&self, invocation: &Invocation) -> FeedResult<PriceUpdate> {
        let result = self.parse_inner(invocation);
        match &result {
            Ok(update) => {
                self.stats.parsed.fetch_add(1, Ordering::Relaxed);
                trace!(key = %update.key, value = update.value, "Parsed price update");
            }
            Err(_) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn parse_inner(&self, invocation: &Invocation) -> FeedResult<PriceUpdate> {
        if !invocation.target.eq_ignore_ascii_case(&self.target) {
            return Err(FeedError::UnexpectedTarget(invocation.target.clone()));
        }

        let argument = invocation
            .arguments
            .first()
            .ok_or_else(|| FeedError::ParseError("price update without arguments".to_string()))?;

        let raw: RawPriceUpdate = serde_json::from_value(argument.clone())?;
        Ok(PriceUpdate {
            key: Key::parse(&raw.ticker)?,
            value: raw.price.to_f64()?,
        })
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
