//! Per-key fixed-window counting state.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of recording one request against a key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request fits in the window and has been counted.
    Allowed {
        /// Requests counted in the window, including this one.
        count: u64,
        /// Whether this request opened a fresh window.
        new_window: bool,
        /// Epoch milliseconds at which the window resets.
        reset_at: u64,
    },
    /// The window is full. Nothing was counted.
    Rejected {
        /// Requests already counted in the window.
        count: u64,
        /// Epoch milliseconds at which the window resets.
        reset_at: u64,
    },
}

impl Decision {
    /// Returns `true` if the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// The window's count after this decision.
    pub fn count(&self) -> u64 {
        match *self {
            Decision::Allowed { count, .. } | Decision::Rejected { count, .. } => count,
        }
    }

    /// When the window this decision was made against resets.
    pub fn reset_at(&self) -> u64 {
        match *self {
            Decision::Allowed { reset_at, .. } | Decision::Rejected { reset_at, .. } => reset_at,
        }
    }
}

/// Counting state for one key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests counted in this window. Always at least 1.
    pub count: u64,
    /// Epoch milliseconds at which the window expires.
    pub reset_at: u64,
}

impl WindowState {
    fn open(now: u64, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(window_millis(window)),
        }
    }

    /// Whether the window has run out at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_at <= now
    }

    fn record(&mut self, now: u64, max_requests: u64, window: Duration) -> Decision {
        if self.is_expired(now) {
            *self = WindowState::open(now, window);
            return self.opened();
        }

        if self.count < max_requests {
            self.count += 1;
            return Decision::Allowed {
                count: self.count,
                new_window: false,
                reset_at: self.reset_at,
            };
        }

        Decision::Rejected {
            count: self.count,
            reset_at: self.reset_at,
        }
    }

    fn opened(&self) -> Decision {
        Decision::Allowed {
            count: self.count,
            new_window: true,
            reset_at: self.reset_at,
        }
    }
}

/// Converts a window length to whole milliseconds, saturating on overflow.
pub(crate) fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

/// Concurrent map from caller key to its current window.
///
/// The map is sharded, so writers on unrelated keys rarely contend. Every
/// mutation of a key happens under its shard's write lock, which makes
/// [`WindowStore::record_and_check`] atomic per key.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: DashMap<String, WindowState>,
}

impl WindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request for `key` if its window has room.
    ///
    /// Opens a fresh window when the key is unknown or its window expired.
    pub fn record_and_check(
        &self,
        key: &str,
        now: u64,
        max_requests: u64,
        window: Duration,
    ) -> Decision {
        // Fast path for known keys avoids allocating the owned key.
        if let Some(mut state) = self.windows.get_mut(key) {
            return state.record(now, max_requests, window);
        }

        match self.windows.entry(key.to_owned()) {
            // Another caller inserted the key between the two lookups.
            Entry::Occupied(mut occupied) => occupied.get_mut().record(now, max_requests, window),
            Entry::Vacant(vacant) => vacant.insert(WindowState::open(now, window)).opened(),
        }
    }

    /// Requests still available to `key` in its current window.
    pub fn remaining_for(&self, key: &str, now: u64, max_requests: u64) -> u64 {
        match self.windows.get(key) {
            Some(state) if !state.is_expired(now) => max_requests.saturating_sub(state.count),
            _ => max_requests,
        }
    }

    /// When `key`'s window resets, in epoch milliseconds.
    ///
    /// Unknown keys report `now + window`. Expired windows still report their
    /// stale reset time, which callers treat as "resets on the next request".
    pub fn reset_time_for(&self, key: &str, now: u64, window: Duration) -> u64 {
        match self.windows.get(key) {
            Some(state) => state.reset_at,
            None => now.saturating_add(window_millis(window)),
        }
    }

    /// Snapshot of `key`'s window, if one is tracked.
    pub fn get(&self, key: &str) -> Option<WindowState> {
        self.windows.get(key).map(|state| *state)
    }

    /// Drop every window that has expired at `now`.
    ///
    /// Shards are locked one at a time, so admission on other shards keeps
    /// running during a sweep. Returns the number of entries removed.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, state| {
            if state.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Forget every window.
    pub fn clear(&self) {
        self.windows.clear();
    }
}
