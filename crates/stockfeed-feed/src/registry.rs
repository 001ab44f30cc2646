//! Subscription registry.
//!
//! The set of keys the dashboard follows, each with its own rolling window.
//! Mutated only by the controller task, so plain `&mut self` methods suffice.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use stockfeed_core::{Key, Result as CoreResult, RollingWindow, Snapshot};
use tracing::debug;

/// Identity of one registry entry.
///
/// Re-adding a removed key creates a new id, so work started for the old
/// entry can be told apart from work for the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State kept for one subscribed key.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub key: Key,
    pub id: EntryId,
    /// Whether the hub acknowledged the join on the current connection.
    pub joined_remote: bool,
    pub last_price: Option<f64>,
    pub window: RollingWindow,
    pub added_at: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(EntryId),
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Updated(Snapshot),
    NotFound,
}

/// Registry of subscribed keys.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    entries: HashMap<Key, SubscriptionEntry>,
    /// Empty window cloned into each new entry.
    template: RollingWindow,
    next_id: u64,
}

impl SubscriptionRegistry {
    /// Create a registry whose windows hold `window_capacity` observations.
    pub fn new(window_capacity: usize) -> CoreResult<Self> {
        Ok(Self {
            entries: HashMap::new(),
            template: RollingWindow::new(window_capacity)?,
            next_id: 1,
        })
    }

    pub fn window_capacity(&self) -> usize {
        self.template.capacity()
    }

    /// Add a key. No network activity.
    pub fn add(&mut self, key: Key) -> AddOutcome {
        if self.entries.contains_key(&key) {
            return AddOutcome::AlreadyPresent;
        }
        let id = EntryId(self.next_id);
        self.next_id += 1;
        debug!(key = %key, id = %id, "Subscription added");
        self.entries.insert(
            key.clone(),
            SubscriptionEntry {
                key,
                id,
                joined_remote: false,
                last_price: None,
                window: self.template.clone(),
                added_at: Utc::now(),
                last_update: None,
            },
        );
        AddOutcome::Added(id)
    }

    /// Remove a key and release its window.
    pub fn remove(&mut self, key: &Key) -> RemoveOutcome {
        match self.entries.remove(key) {
            Some(entry) => {
                debug!(key = %key, id = %entry.id, observations = entry.window.len(), "Subscription removed");
                RemoveOutcome::Removed
            }
            None => RemoveOutcome::NotFound,
        }
    }

    /// Ordered snapshot of the registered keys.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.entries.keys().cloned().collect()
    }

    /// Append an observation to the key's window.
    ///
    /// Unknown keys are reported as `NotFound`; non-finite values are
    /// rejected without touching the window.
    pub fn record_observation(&mut self, key: &Key, value: f64) -> CoreResult<RecordOutcome> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Ok(RecordOutcome::NotFound);
        };
        let snapshot = entry.window.push(value)?;
        entry.last_price = Some(value);
        entry.last_update = Some(Utc::now());
        Ok(RecordOutcome::Updated(snapshot))
    }

    /// Mark the entry as joined on the hub. Ignored when `id` is stale.
    pub fn mark_joined(&mut self, key: &Key, id: EntryId) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.id == id => {
                entry.joined_remote = true;
                true
            }
            _ => false,
        }
    }

    /// Forget hub membership of every entry (connection lost).
    pub fn reset_joined(&mut self) {
        for entry in self.entries.values_mut() {
            entry.joined_remote = false;
        }
    }

    /// Keys the hub has not acknowledged on the current connection.
    pub fn unjoined_keys(&self) -> BTreeSet<Key> {
        self.entries
            .values()
            .filter(|entry| !entry.joined_remote)
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether `key` is registered under exactly this entry id.
    pub fn is_current(&self, key: &Key, id: EntryId) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &Key) -> Option<&SubscriptionEntry> {
        self.entries.get(key)
    }

    pub fn snapshot(&self, key: &Key) -> Option<Snapshot> {
        self.entries.get(key).and_then(|entry| entry.window.snapshot())
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            template: RollingWindow::default(),
            next_id: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockfeed_core::CoreError;

    fn key(raw: &str) -> Key {
        Key::parse(raw).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            SubscriptionRegistry::new(0),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = SubscriptionRegistry::default();
        assert!(matches!(registry.add(key("AAPL")), AddOutcome::Added(_)));
        assert_eq!(registry.add(key("aapl")), AddOutcome::AlreadyPresent);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_then_readd_gets_new_id() {
        let mut registry = SubscriptionRegistry::default();
        let AddOutcome::Added(first) = registry.add(key("AAPL")) else {
            panic!("expected Added");
        };
        assert_eq!(registry.remove(&key("AAPL")), RemoveOutcome::Removed);
        assert_eq!(registry.remove(&key("AAPL")), RemoveOutcome::NotFound);

        let AddOutcome::Added(second) = registry.add(key("AAPL")) else {
            panic!("expected Added");
        };
        assert_ne!(first, second);
        assert!(!registry.mark_joined(&key("AAPL"), first));
        assert!(registry.mark_joined(&key("AAPL"), second));
    }

    #[test]
    fn test_record_unknown_key() {
        let mut registry = SubscriptionRegistry::default();
        assert_eq!(
            registry.record_observation(&key("MSFT"), 10.0).unwrap(),
            RecordOutcome::NotFound
        );
    }

    #[test]
    fn test_record_updates_window() {
        let mut registry = SubscriptionRegistry::new(3).unwrap();
        registry.add(key("AAPL"));
        for value in [150.0, 151.0, 149.0, 152.0] {
            registry.record_observation(&key("AAPL"), value).unwrap();
        }

        let entry = registry.entry(&key("AAPL")).unwrap();
        assert_eq!(entry.window.len(), 3);
        assert_eq!(entry.last_price, Some(152.0));
        assert!(entry.last_update.is_some());

        let snapshot = registry.snapshot(&key("AAPL")).unwrap();
        assert_eq!(snapshot.min, 149.0);
        assert_eq!(snapshot.max, 152.0);
        assert_eq!(snapshot.previous, Some(149.0));
    }

    #[test]
    fn test_non_finite_leaves_window_untouched() {
        let mut registry = SubscriptionRegistry::default();
        registry.add(key("AAPL"));
        registry.record_observation(&key("AAPL"), 1.0).unwrap();
        assert!(registry
            .record_observation(&key("AAPL"), f64::INFINITY)
            .is_err());
        assert_eq!(registry.entry(&key("AAPL")).unwrap().last_price, Some(1.0));
        assert_eq!(registry.snapshot(&key("AAPL")).unwrap().count, 1);
    }

    #[test]
    fn test_keys_and_joined_bookkeeping() {
        let mut registry = SubscriptionRegistry::default();
        let AddOutcome::Added(msft) = registry.add(key("MSFT")) else {
            panic!("expected Added");
        };
        registry.add(key("AMZN"));
        registry.mark_joined(&key("MSFT"), msft);

        let keys: Vec<String> = registry.keys().into_iter().map(String::from).collect();
        assert_eq!(keys, vec!["AMZN", "MSFT"]);
        assert_eq!(registry.unjoined_keys().len(), 1);

        registry.reset_joined();
        assert_eq!(registry.unjoined_keys().len(), 2);
    }
}
