//! Subscription tracking for stockfeed.
//!
//! Keeps the set of subscribed keys, one rolling window per key, and turns
//! hub price pushes into typed updates.

pub mod error;
pub mod parser;
pub mod registry;

pub use error::{FeedError, FeedResult};
pub use parser::{MessageParser, PriceUpdate, PRICE_UPDATE_TARGET};
pub use registry::{
    AddOutcome, EntryId, RecordOutcome, RemoveOutcome, SubscriptionEntry, SubscriptionRegistry,
};
