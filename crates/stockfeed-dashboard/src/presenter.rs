//! Presentation callbacks.
//!
//! The controller never renders anything itself; every user-visible change
//! goes through a `Presenter`. The binary uses `TracingPresenter`, tests use
//! `RecordingPresenter`.

use parking_lot::Mutex;
use std::sync::Arc;
use stockfeed_core::{Delta, Key, Snapshot};
use stockfeed_ws::ConnectionState;
use tracing::{info, warn};

/// Per-key condition worth showing to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The initial fetch returned no price.
    PriceUnavailable,
    /// The initial fetch failed.
    FetchFailed(String),
    /// The hub did not accept the join; updates will not arrive until the
    /// next reconnect.
    JoinFailed(String),
    LeaveFailed(String),
}

/// Rendering callbacks, invoked on the controller task.
pub trait Presenter: Send {
    fn on_snapshot(&mut self, key: &Key, snapshot: &Snapshot);

    fn on_duplicate(&mut self, key: &Key);

    fn on_removed(&mut self, key: &Key);

    fn on_connection_state_changed(&mut self, state: ConnectionState);

    fn on_notice(&mut self, key: &Key, notice: Notice);
}

/// `$150.25`
pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

/// `+1.25 (0.84%)`, or just the absolute change when the percentage is undefined.
pub fn format_change(delta: &Delta) -> String {
    let sign = if delta.is_gain() { "+" } else { "" };
    match delta.percent {
        Some(percent) => format!("{sign}{:.2} ({percent:.2}%)", delta.absolute),
        None => format!("{sign}{:.2}", delta.absolute),
    }
}

/// Presenter that renders through structured logs.
pub struct TracingPresenter {
    padding_fraction: f64,
}

impl TracingPresenter {
    pub fn new(padding_fraction: f64) -> Self {
        Self { padding_fraction }
    }
}

impl Presenter for TracingPresenter {
    fn on_snapshot(&mut self, key: &Key, snapshot: &Snapshot) {
        let (axis_min, axis_max) = snapshot.padded_range(self.padding_fraction);
        let change = snapshot
            .delta()
            .map(|delta| format_change(&delta))
            .unwrap_or_default();
        info!(
            key = %key,
            price = %format_price(snapshot.last),
            change = %change,
            axis_min,
            axis_max,
            points = snapshot.count,
            "Price update"
        );
    }

    fn on_duplicate(&mut self, key: &Key) {
        warn!(key = %key, "This key is already on the dashboard");
    }

    fn on_removed(&mut self, key: &Key) {
        info!(key = %key, "Removed from dashboard");
    }

    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        info!(state = %state, "Connection state");
    }

    fn on_notice(&mut self, key: &Key, notice: Notice) {
        match notice {
            Notice::PriceUnavailable => warn!(key = %key, "Unable to fetch price"),
            Notice::FetchFailed(error) => warn!(key = %key, %error, "Error fetching price"),
            Notice::JoinFailed(error) => warn!(key = %key, %error, "Failed to join price group"),
            Notice::LeaveFailed(error) => warn!(key = %key, %error, "Failed to leave price group"),
        }
    }
}

/// Recorded presenter call.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    Snapshot(Key, Snapshot),
    Duplicate(Key),
    Removed(Key),
    StateChanged(ConnectionState),
    Notice(Key, Notice),
}

/// Presenter that records every call, for tests.
///
/// Clones share the same log, so a test can keep one handle while the
/// controller owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    events: Arc<Mutex<Vec<PresenterEvent>>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PresenterEvent> {
        self.events.lock().clone()
    }

    /// Snapshots delivered for `key`, in order.
    pub fn snapshots_for(&self, key: &str) -> Vec<Snapshot> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                PresenterEvent::Snapshot(k, snapshot) if k.as_str() == key => Some(*snapshot),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Presenter for RecordingPresenter {
    fn on_snapshot(&mut self, key: &Key, snapshot: &Snapshot) {
        self.events
            .lock()
            .push(PresenterEvent::Snapshot(key.clone(), *snapshot));
    }

    fn on_duplicate(&mut self, key: &Key) {
        self.events.lock().push(PresenterEvent::Duplicate(key.clone()));
    }

    fn on_removed(&mut self, key: &Key) {
        self.events.lock().push(PresenterEvent::Removed(key.clone()));
    }

    fn on_connection_state_changed(&mut self, state: ConnectionState) {
        self.events.lock().push(PresenterEvent::StateChanged(state));
    }

    fn on_notice(&mut self, key: &Key, notice: Notice) {
        self.events
            .lock()
            .push(PresenterEvent::Notice(key.clone(), notice));
    }
}
