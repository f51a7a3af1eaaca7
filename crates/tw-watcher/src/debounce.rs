//! Per-path debouncing of resolved events.
//!
//! The [`Debouncer`] is a timer table keyed by absolute path. Each submission
//! refreshes the path's deadline to `now + delay`, so a burst collapses into
//! one emission fired `delay` after the last submission. The session driver
//! owns the table and sleeps until [`Debouncer::next_deadline`]; nothing here
//! spawns tasks or reads the clock.
//!
//! With a zero delay every submission is returned immediately and nothing is
//! ever pending.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tw_core::{FxHashMap, fx_hash_map};

/// A path waiting for its debounce window to elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEvent {
    /// Time of the most recent submission.
    pub last_seen: Instant,
    /// Number of submissions coalesced into this entry.
    pub occurrences: u32,
}

impl PendingEvent {
    fn new(now: Instant) -> Self {
        Self {
            last_seen: now,
            occurrences: 1,
        }
    }

    fn refresh(&mut self, now: Instant) {
        self.last_seen = now;
        self.occurrences = self.occurrences.saturating_add(1);
    }
}

/// Timer table coalescing events per absolute path.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: FxHashMap<PathBuf, PendingEvent>,
}

impl Debouncer {
    /// Creates a debouncer with the given window.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: fx_hash_map(),
        }
    }

    /// Returns the debounce window.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Records an event for `path` observed at `now`.
    ///
    /// Returns the path back when it must be emitted right away (zero delay);
    /// otherwise the path is held until its window elapses.
    pub fn submit(&mut self, path: PathBuf, now: Instant) -> Option<PathBuf> {
        if self.delay.is_zero() {
            return Some(path);
        }

        match self.pending.get_mut(&path) {
            Some(pending) => {
                pending.refresh(now);
                tracing::trace!(path = %path.display(), occurrences = pending.occurrences, "Coalesced event");
            }
            None => {
                self.pending.insert(path, PendingEvent::new(now));
            }
        }
        None
    }

    /// Returns the earliest instant at which a pending path becomes due.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.last_seen + self.delay)
            .min()
    }

    /// Removes and returns every path whose window has elapsed at `now`.
    ///
    /// Paths are returned in the order of their last submission.
    pub fn drain_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.last_seen + self.delay <= now)
            .map(|(path, pending)| (pending.last_seen, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_, path)| {
                self.pending.remove(&path);
                path
            })
            .collect()
    }

    /// Returns the pending entry for `path`, if any.
    #[must_use]
    pub fn pending(&self, path: &Path) -> Option<&PendingEvent> {
        self.pending.get(path)
    }

    /// Drops every pending entry without emitting it.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Returns the number of pending paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
