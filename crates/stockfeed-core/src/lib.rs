//! Core domain types for the stockfeed dashboard.
//!
//! This crate provides the types shared by every other crate:
//! - `Key`: Normalized symbol identifier
//! - `RollingWindow`: Fixed-capacity observation buffer per key
//! - `Snapshot`, `Delta`: Render-ready views derived from a window
//! - `BoxFuture`: Boxed future used by the dyn-compatible async seams

pub mod error;
pub mod key;
pub mod window;

pub use error::{CoreError, Result};
pub use key::Key;
pub use window::{
    Delta, RollingWindow, Snapshot, DEFAULT_PADDING_FRACTION, DEFAULT_WINDOW_CAPACITY,
};

use std::future::Future;
use std::pin::Pin;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
