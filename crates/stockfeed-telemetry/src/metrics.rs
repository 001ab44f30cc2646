//! Prometheus metrics for the stockfeed dashboard.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`: a failure means duplicate metric
//! names, which is a programming error caught at first use.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec, Counter,
    CounterVec, Gauge, GaugeVec,
};

/// Hub connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "stockfeed_ws_connected",
        "Hub connection state (1=connected)"
    )
    .unwrap()
});

/// Session state machine current state.
/// Labels: state (disconnected/connecting/connected)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "stockfeed_ws_state",
        "Session state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Successful reconnections (handshakes after the first).
pub static WS_RECONNECT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "stockfeed_ws_reconnect_total",
        "Total successful hub reconnections"
    )
    .unwrap()
});

/// Inbound price pushes by outcome.
/// Labels: outcome (applied/unknown_key/invalid_value/malformed/ignored)
pub static INBOUND_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "stockfeed_inbound_total",
        "Inbound hub messages by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Failed remote calls.
/// Labels: method (fetch/join/leave)
pub static REMOTE_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "stockfeed_remote_failures_total",
        "Failed remote calls by method",
        &["method"]
    )
    .unwrap()
});

/// Keys currently in the registry.
pub static ACTIVE_SUBSCRIPTIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "stockfeed_active_subscriptions",
        "Number of subscribed keys"
    )
    .unwrap()
});

const STATES: [&str; 3] = ["disconnected", "connecting", "connected"];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record the session's current state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "connected" { 1.0 } else { 0.0 });
    }

    /// Record a reconnection.
    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    /// Record an inbound message outcome.
    pub fn inbound(outcome: &str) {
        INBOUND_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a failed remote call.
    pub fn remote_failure(method: &str) {
        REMOTE_FAILURES_TOTAL.with_label_values(&[method]).inc();
    }

    /// Set the number of subscribed keys.
    pub fn subscriptions(count: usize) {
        ACTIVE_SUBSCRIPTIONS.set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_one_hot() {
        Metrics::ws_state_set("connecting");
        Metrics::ws_state_set("connected");
        assert_eq!(WS_STATE.with_label_values(&["connected"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["connecting"]).get(), 0.0);
        assert_eq!(WS_CONNECTED.get(), 1.0);
    }

    #[test]
    fn test_counters_increase() {
        let before = INBOUND_TOTAL.with_label_values(&["malformed"]).get();
        Metrics::inbound("malformed");
        assert_eq!(
            INBOUND_TOTAL.with_label_values(&["malformed"]).get(),
            before + 1.0
        );
    }
}
