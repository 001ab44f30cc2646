//! Group membership abstraction.
//!
//! Price pushes are scoped to hub groups, one group per key. The dashboard
//! talks to the hub through this trait so it can be driven by a mock in tests.

use crate::error::{WsError, WsResult};
use crate::invocation::Ack;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stockfeed_core::BoxFuture;

/// Join and leave hub groups.
///
/// Both calls resolve once the hub acknowledges (or rejects) the request.
pub trait GroupMembership: Send + Sync {
    /// Ask the hub to start pushing updates for `key`.
    fn join_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>>;

    /// Ask the hub to stop pushing updates for `key`.
    fn leave_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>>;
}

/// Arc wrapper for GroupMembership trait objects.
pub type DynGroupMembership = Arc<dyn GroupMembership>;

/// Mock group membership for testing.
#[derive(Debug)]
pub struct MockGroupMembership {
    /// Recorded join requests, in call order.
    joins: Mutex<Vec<String>>,
    /// Recorded leave requests, in call order.
    leaves: Mutex<Vec<String>>,
    /// Keys whose join/leave is rejected by the "hub".
    rejected: Mutex<HashSet<String>>,
    /// When false, every call fails with `NotConnected`.
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl Default for MockGroupMembership {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGroupMembership {
    /// Create a new connected mock.
    pub fn new() -> Self {
        Self {
            joins: Mutex::new(Vec::new()),
            leaves: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reject join/leave calls for `key`.
    pub fn reject(&self, key: &str) {
        self.rejected.lock().insert(key.to_string());
    }

    /// Accept join/leave calls for `key` again.
    pub fn accept(&self, key: &str) {
        self.rejected.lock().remove(key);
    }

    /// Set whether the mock behaves as connected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Get recorded joins.
    pub fn joins(&self) -> Vec<String> {
        self.joins.lock().clone()
    }

    /// Get recorded leaves.
    pub fn leaves(&self) -> Vec<String> {
        self.leaves.lock().clone()
    }

    /// Clear recorded calls.
    pub fn clear(&self) {
        self.joins.lock().clear();
        self.leaves.lock().clear();
    }

    fn respond(&self, method: &str, key: &str) -> WsResult<Ack> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(WsError::NotConnected);
        }
        if self.rejected.lock().contains(key) {
            return Err(WsError::Remote {
                method: method.to_string(),
                message: format!("rejected {key}"),
            });
        }
        Ok(Ack {
            invocation_id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            result: None,
        })
    }
}

impl GroupMembership for MockGroupMembership {
    fn join_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>> {
        Box::pin(async move {
            self.joins.lock().push(key.to_string());
            self.respond("JoinStockGroup", key)
        })
    }

    fn leave_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>> {
        Box::pin(async move {
            self.leaves.lock().push(key.to_string());
            self.respond("LeaveStockGroup", key)
        })
    }
}
