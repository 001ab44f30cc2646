//! Initial price snapshots for stockfeed.
//!
//! Before the hub starts pushing updates for a newly added key, the dashboard
//! seeds its window with the current price from the REST API.

pub mod client;
pub mod error;

pub use client::{DynQuoteSource, MockQuoteSource, QuoteClient, QuoteSource};
pub use error::{QuoteError, QuoteResult};
