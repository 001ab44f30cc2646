//! Rolling observation window.
//!
//! Each subscribed key owns one `RollingWindow` holding its most recent
//! observations. The window backs every derived value shown on the
//! dashboard: last price, delta against the previous observation, and the
//! padded min/max used to scale a chart axis.

use crate::error::{CoreError, Result};
use serde::Serialize;
use std::collections::VecDeque;

/// Default number of observations kept per key.
pub const DEFAULT_WINDOW_CAPACITY: usize = 30;

/// Default fraction of the min/max range added above and below for display.
pub const DEFAULT_PADDING_FRACTION: f64 = 0.1;

/// Change between the two most recent observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Delta {
    /// `last - previous`.
    pub absolute: f64,
    /// `absolute / previous * 100`. Absent when `previous` is zero.
    pub percent: Option<f64>,
}

impl Delta {
    fn between(previous: f64, last: f64) -> Self {
        let absolute = last - previous;
        let percent = if previous == 0.0 {
            None
        } else {
            Some(absolute / previous * 100.0)
        };
        Self { absolute, percent }
    }

    /// Whether the change is non-negative.
    pub fn is_gain(&self) -> bool {
        self.absolute >= 0.0
    }
}

/// Render-ready view of a window after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    /// Number of observations currently held.
    pub count: usize,
    /// Minimum over the current contents.
    pub min: f64,
    /// Maximum over the current contents.
    pub max: f64,
    /// Most recent observation.
    pub last: f64,
    /// Observation preceding `last`, if any.
    pub previous: Option<f64>,
}

impl Snapshot {
    /// Delta between `previous` and `last`, absent for a single observation.
    pub fn delta(&self) -> Option<Delta> {
        self.previous.map(|prev| Delta::between(prev, self.last))
    }

    /// Padded display range.
    ///
    /// Returns `(min - range * fraction, max + range * fraction)`. A window
    /// whose values are all equal yields a zero-width range `(v, v)`; callers
    /// must substitute their own margin rather than divide by the width.
    /// Bounds are clamped to finite values for ranges near `f64::MAX`.
    pub fn padded_range(&self, padding_fraction: f64) -> (f64, f64) {
        let padding = (self.max - self.min) * padding_fraction;
        (
            (self.min - padding).max(f64::MIN),
            (self.max + padding).min(f64::MAX),
        )
    }
}

/// Fixed-capacity FIFO buffer of finite observations.
///
/// Min and max are recomputed over the whole window on every push; at the
/// window sizes involved this is cheaper than maintaining a monotonic deque.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
    min: f64,
    max: f64,
}

impl RollingWindow {
    /// Create a window holding at most `capacity` observations.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "window capacity must be positive".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        })
    }

    /// Append an observation, evicting the oldest one beyond capacity.
    pub fn push(&mut self, value: f64) -> Result<Snapshot> {
        if !value.is_finite() {
            return Err(CoreError::InvalidValue(value));
        }

        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
        self.recompute_bounds();

        // Non-empty after a push.
        Ok(self.current_snapshot(value))
    }

    /// Current snapshot, absent while the window is empty.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.values.back().map(|&last| self.current_snapshot(last))
    }

    /// Delta between the two most recent observations.
    pub fn delta(&self) -> Option<Delta> {
        self.snapshot().and_then(|s| s.delta())
    }

    /// Padded display range, absent while the window is empty.
    pub fn padded_range(&self, padding_fraction: f64) -> Option<(f64, f64)> {
        self.snapshot().map(|s| s.padded_range(padding_fraction))
    }

    pub fn min(&self) -> Option<f64> {
        (!self.values.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.values.is_empty()).then_some(self.max)
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Observations from oldest to newest.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every observation.
    pub fn clear(&mut self) {
        self.values.clear();
        self.recompute_bounds();
    }

    fn recompute_bounds(&mut self) {
        let (min, max) = self
            .values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        self.min = min;
        self.max = max;
    }

    fn current_snapshot(&self, last: f64) -> Snapshot {
        let previous = self
            .values
            .len()
            .checked_sub(2)
            .and_then(|idx| self.values.get(idx).copied());
        Snapshot {
            count: self.values.len(),
            min: self.min,
            max: self.max,
            last,
            previous,
        }
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            values: VecDeque::with_capacity(DEFAULT_WINDOW_CAPACITY + 1),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}
