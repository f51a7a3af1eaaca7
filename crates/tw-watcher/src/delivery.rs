//! Notification delivery and session lifecycle.
//!
//! One [`Delivery`] exists per caller-visible session. Every driver task of
//! the session (one for a single session, one per child for a composed
//! session) reports through it, and the caller closes through it. The
//! session state lives behind a single lock so that a change is either fully
//! delivered before `close` returns or never delivered at all. The closed
//! flag is mirrored in an atomic so `is_closed` never takes that lock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tw_core::{FxHashMap, fx_hash_map};

use crate::codec::EncodedName;
use crate::error::WatchError;
use crate::events::{ChangeEvent, EventKind, Notification};

/// How long a path reported by one child of a composed session suppresses
/// the same path from its siblings.
pub const COMPOSED_DEDUP_WINDOW: Duration = Duration::from_millis(50);

/// Callback receiving `(kind, name)` for each change instead of the
/// notification stream.
///
/// Listeners run on a driver task while the session lock is held. Until a
/// listener returns, `close()` and `state()` on any thread wait for it, and
/// so do the other children of a composed session. Keep listeners short,
/// hand slow work to a channel, and never close the session from inside its
/// own listener. `is_closed()` does not wait.
pub type Listener = Box<dyn FnMut(EventKind, &EncodedName) + Send + 'static>;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Initial discovery in progress.
    Initializing,
    /// Discovery finished; events flow.
    Ready,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        })
    }
}

/// Cross-child dedup for composed sessions.
///
/// Children observe the same filesystem change through their own native
/// handles at nearly the same instant. A path reported by one child
/// suppresses that path from other children for [`COMPOSED_DEDUP_WINDOW`];
/// repeated reports from the same child are never suppressed. Entries older
/// than the window are pruned on every check.
#[derive(Debug)]
pub(crate) struct BatchDedup {
    window: Duration,
    seen: FxHashMap<PathBuf, (usize, Instant)>,
}

impl BatchDedup {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            seen: fx_hash_map(),
        }
    }

    /// Returns `true` if `origin` may report `path` at `now`.
    pub(crate) fn admit(&mut self, origin: usize, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.seen
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < window);

        match self.seen.get_mut(path) {
            Some((seen_by, _)) if *seen_by != origin => false,
            Some((_, at)) => {
                *at = now;
                true
            }
            None => {
                self.seen.insert(path.to_owned(), (origin, now));
                true
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

struct DeliveryState {
    state: SessionState,
    composed: bool,
    pending_ready: usize,
    dedup: Option<BatchDedup>,
    listener: Option<Listener>,
}

/// Shared sink for one session's notifications.
pub(crate) struct Delivery {
    inner: Mutex<DeliveryState>,
    closed: AtomicBool,
    tx: mpsc::UnboundedSender<Notification>,
    cancel: CancellationToken,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Delivery {
    /// Creates the sink of a single-path session.
    pub(crate) fn single(tx: mpsc::UnboundedSender<Notification>, listener: Option<Listener>) -> Self {
        Self::new(tx, 1, false, None, listener)
    }

    /// Creates the sink shared by `children` drivers of a composed session.
    pub(crate) fn composed(
        tx: mpsc::UnboundedSender<Notification>,
        children: usize,
        listener: Option<Listener>,
    ) -> Self {
        Self::new(
            tx,
            children,
            true,
            Some(BatchDedup::new(COMPOSED_DEDUP_WINDOW)),
            listener,
        )
    }

    fn new(
        tx: mpsc::UnboundedSender<Notification>,
        children: usize,
        composed: bool,
        dedup: Option<BatchDedup>,
        listener: Option<Listener>,
    ) -> Self {
        Self {
            inner: Mutex::new(DeliveryState {
                state: SessionState::Initializing,
                composed,
                pending_ready: children,
                dedup,
                listener,
            }),
            closed: AtomicBool::new(false),
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the session closes.
    pub(crate) fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks one driver's initial discovery as finished.
    pub(crate) fn ready(&self, origin: usize) {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Initializing {
            return;
        }
        inner.pending_ready = inner.pending_ready.saturating_sub(1);
        tracing::debug!(origin, remaining = inner.pending_ready, "Driver ready");
        if inner.pending_ready > 0 {
            return;
        }

        inner.state = SessionState::Ready;
        if !inner.composed {
            let _ = self.tx.send(Notification::Ready);
        }
        tracing::info!(composed = inner.composed, "Watch session ready");
    }

    /// Delivers a change reported by driver `origin`.
    pub(crate) fn change(&self, origin: usize, event: ChangeEvent) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            tracing::trace!(path = %event.path.display(), "Dropping change after close");
            return;
        }
        if let Some(dedup) = inner.dedup.as_mut() {
            if !dedup.admit(origin, &event.path, Instant::now()) {
                tracing::trace!(path = %event.path.display(), origin, "Suppressed duplicate from sibling");
                return;
            }
        }

        tracing::trace!(path = %event.path.display(), kind = %event.kind, "Delivering change");
        match inner.listener.as_mut() {
            Some(listener) => listener(event.kind, &event.name),
            None => {
                let _ = self.tx.send(Notification::Change(event));
            }
        }
    }

    /// Reports a runtime failure. The session stays open.
    pub(crate) fn error(&self, err: WatchError) {
        let inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return;
        }
        tracing::warn!(error = %err, "Watch error");
        let _ = self.tx.send(Notification::Error(err));
    }

    /// Closes the session. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Closed {
            return false;
        }
        inner.state = SessionState::Closed;
        self.closed.store(true, Ordering::Release);
        inner.dedup = None;
        inner.listener = None;
        let _ = self.tx.send(Notification::Close);
        self.cancel.cancel();
        tracing::info!("Watch session closed");
        true
    }
}
