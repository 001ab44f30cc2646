//! Hub connection session for stockfeed price pushes.
//!
//! Provides a resilient duplex connection to a SignalR-style hub with:
//! - Automatic reconnection with fixed or exponential backoff
//! - A reconnect hook published before any inbound message of a new connection
//! - Group join/leave invocations correlated with their completions
//! - Keep-alive pings and server timeout detection
//! - Channel-based, order-preserving event delivery

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod invocation;
pub mod membership;
pub mod message;

pub use backoff::{BackoffStrategy, ReconnectConfig, ReconnectPolicy};
pub use connection::{ConnectionConfig, ConnectionSession, ConnectionState, SessionEvent};
pub use error::{WsError, WsResult};
pub use invocation::{Ack, InvocationTracker};
pub use membership::{DynGroupMembership, GroupMembership, MockGroupMembership};
pub use message::{Completion, HubMessage, Invocation, RECORD_SEPARATOR};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
