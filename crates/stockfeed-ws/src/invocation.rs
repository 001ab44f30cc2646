//! Correlation of outgoing hub invocations with their completions.

use crate::error::{WsError, WsResult};
use crate::message::Completion;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Successful completion of a hub invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub invocation_id: String,
    pub result: Option<Value>,
}

struct PendingInvocation {
    method: String,
    responder: oneshot::Sender<WsResult<Ack>>,
    sent_at: DateTime<Utc>,
}

/// Tracks invocations awaiting a completion.
///
/// Ids are unique for the lifetime of the tracker, so a completion that
/// arrives after its caller gave up is dropped rather than misrouted.
pub struct InvocationTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingInvocation>>,
}

impl InvocationTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next invocation id.
    pub fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Register an invocation and get the receiver for its outcome.
    pub fn register(&self, invocation_id: &str, method: &str) -> oneshot::Receiver<WsResult<Ack>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            invocation_id.to_string(),
            PendingInvocation {
                method: method.to_string(),
                responder: tx,
                sent_at: Utc::now(),
            },
        );
        rx
    }

    /// Resolve a pending invocation. Returns false for unknown ids.
    pub fn complete(&self, completion: Completion) -> bool {
        let Some(pending) = self.pending.lock().remove(&completion.invocation_id) else {
            debug!(
                invocation_id = %completion.invocation_id,
                "Completion for unknown invocation, ignoring"
            );
            return false;
        };

        let elapsed_ms = (Utc::now() - pending.sent_at).num_milliseconds();
        let outcome = match completion.error {
            Some(message) => {
                warn!(
                    method = %pending.method,
                    invocation_id = %completion.invocation_id,
                    error = %message,
                    "Hub rejected invocation"
                );
                Err(WsError::Remote {
                    method: pending.method,
                    message,
                })
            }
            None => {
                debug!(
                    method = %pending.method,
                    invocation_id = %completion.invocation_id,
                    elapsed_ms,
                    "Invocation completed"
                );
                Ok(Ack {
                    invocation_id: completion.invocation_id,
                    result: completion.result,
                })
            }
        };
        // Receiver may be gone after a timeout.
        let _ = pending.responder.send(outcome);
        true
    }

    /// Forget an invocation whose caller stopped waiting.
    pub fn cancel(&self, invocation_id: &str) {
        self.pending.lock().remove(invocation_id);
    }

    /// Fail every pending invocation (connection lost).
    pub fn fail_all(&self, make_error: impl Fn() -> WsError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending invocations");
        }
        for (_, pending) in drained {
            let _ = pending.responder.send(Err(make_error()));
        }
    }

    /// Number of invocations awaiting completion.
    pub fn inflight(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Default for InvocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completion(id: &str, error: Option<&str>) -> Completion {
        Completion {
            invocation_id: id.to_string(),
            result: error.is_none().then(|| json!(null)),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let tracker = InvocationTracker::new();
        let a = tracker.next_id();
        let b = tracker.next_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_complete_success() {
        let tracker = InvocationTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id, "JoinStockGroup");
        assert_eq!(tracker.inflight(), 1);

        assert!(tracker.complete(completion(&id, None)));
        let ack = rx.await.unwrap().unwrap();
        assert_eq!(ack.invocation_id, id);
        assert_eq!(tracker.inflight(), 0);
    }

    #[tokio::test]
    async fn test_complete_remote_error() {
        let tracker = InvocationTracker::new();
        let id = tracker.next_id();
        let rx = tracker.register(&id, "LeaveStockGroup");

        tracker.complete(completion(&id, Some("no such group")));
        match rx.await.unwrap() {
            Err(WsError::Remote { method, message }) => {
                assert_eq!(method, "LeaveStockGroup");
                assert_eq!(message, "no such group");
            }
            other => panic!("Expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let tracker = InvocationTracker::new();
        assert!(!tracker.complete(completion("999", None)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let tracker = InvocationTracker::new();
        let rx1 = tracker.register(&tracker.next_id(), "JoinStockGroup");
        let rx2 = tracker.register(&tracker.next_id(), "JoinStockGroup");

        tracker.fail_all(|| WsError::NotConnected);
        assert!(matches!(rx1.await.unwrap(), Err(WsError::NotConnected)));
        assert!(matches!(rx2.await.unwrap(), Err(WsError::NotConnected)));
        assert_eq!(tracker.inflight(), 0);
    }

    #[test]
    fn test_cancel_then_late_completion() {
        let tracker = InvocationTracker::new();
        let id = tracker.next_id();
        let _rx = tracker.register(&id, "JoinStockGroup");
        tracker.cancel(&id);
        assert!(!tracker.complete(completion(&id, None)));
    }
}
