//! Keep-alive management for hub connections.
//!
//! The hub expects a ping whenever the client has been silent for the
//! keep-alive interval, and the client treats a connection that has not
//! delivered any frame within the server timeout as dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Keep-alive tracker for one connection.
pub struct HeartbeatManager {
    /// Client silence after which a ping is sent.
    keep_alive_interval_ms: u64,
    /// Inbound silence after which the connection is considered dead.
    server_timeout_ms: u64,
    /// Last frame sent to the server.
    last_sent: RwLock<DateTime<Utc>>,
    /// Last frame received from the server (any kind).
    last_received: RwLock<DateTime<Utc>>,
    /// Pings sent on the current connection.
    pings_sent: RwLock<u64>,
}

impl HeartbeatManager {
    pub fn new(keep_alive_interval_ms: u64, server_timeout_ms: u64) -> Self {
        let now = Utc::now();
        Self {
            keep_alive_interval_ms,
            server_timeout_ms,
            last_sent: RwLock::new(now),
            last_received: RwLock::new(now),
            pings_sent: RwLock::new(0),
        }
    }

    /// Reset state (called on connection).
    pub fn reset(&self) {
        let now = Utc::now();
        *self.last_sent.write() = now;
        *self.last_received.write() = now;
        *self.pings_sent.write() = 0;
    }

    /// Record that a frame was sent.
    pub fn record_sent(&self) {
        *self.last_sent.write() = Utc::now();
    }

    /// Record that a ping was sent.
    pub fn record_ping(&self) {
        self.record_sent();
        let mut pings = self.pings_sent.write();
        *pings += 1;
        debug!(pings = *pings, "Sent keep-alive ping");
    }

    /// Record that any frame was received.
    pub fn record_message(&self) {
        *self.last_received.write() = Utc::now();
    }

    /// Check if the server has been silent past the timeout.
    pub fn is_timed_out(&self) -> bool {
        self.is_timed_out_at(Utc::now())
    }

    fn is_timed_out_at(&self, now: DateTime<Utc>) -> bool {
        (now - *self.last_received.read()).num_milliseconds() > self.server_timeout_ms as i64
    }

    /// Check if we should send a ping.
    pub fn should_send_ping(&self) -> bool {
        self.should_send_ping_at(Utc::now())
    }

    fn should_send_ping_at(&self, now: DateTime<Utc>) -> bool {
        (now - *self.last_sent.read()).num_milliseconds() >= self.keep_alive_interval_ms as i64
    }

    /// Period of the keep-alive check (half the keep-alive interval).
    pub fn check_period(&self) -> Duration {
        Duration::from_millis((self.keep_alive_interval_ms / 2).max(1))
    }

    /// Get keep-alive statistics.
    pub fn stats(&self) -> HeartbeatStats {
        let now = Utc::now();
        HeartbeatStats {
            last_sent: *self.last_sent.read(),
            last_received: *self.last_received.read(),
            pings_sent: *self.pings_sent.read(),
            time_since_last_received_ms: (now - *self.last_received.read()).num_milliseconds(),
        }
    }
}

/// Keep-alive statistics.
#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_sent: DateTime<Utc>,
    pub last_received: DateTime<Utc>,
    pub pings_sent: u64,
    pub time_since_last_received_ms: i64,
}
