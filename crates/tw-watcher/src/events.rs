//! Event types delivered to callers.
//!
//! # Event Flow
//!
//! ```text
//! RawEvent (native handle)
//!        │  resolve
//!        ▼
//!  FileFilter::should_process
//!        │
//!        ▼
//!  Debouncer (delay window)
//!        │  classify at emission time
//!        ▼
//!  ChangeEvent { kind, path, name }
//!        │
//!        ▼
//!  Notification::Change ──► caller
//! ```

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};

use crate::codec::EncodedName;
use crate::error::WatchError;

/// High-level kind of a delivered change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The entry exists: it was created or its content or metadata changed.
    Update,
    /// The entry no longer exists.
    Remove,
}

impl EventKind {
    /// Returns the lowercase name used in output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a change by checking whether `path` exists right now.
///
/// Symbolic links are not followed, so a dangling link still counts as an
/// update. A path that vanished between the raw event and this check is a
/// removal, never an error.
#[must_use]
pub fn classify(path: &Path) -> EventKind {
    if path.symlink_metadata().is_ok() {
        EventKind::Update
    } else {
        EventKind::Remove
    }
}

/// A debounced, classified and encoded change.
///
/// # Examples
///
/// ```
/// use tw_watcher::{ChangeEvent, EventKind};
/// use tw_core::Encoding;
/// use std::ffi::OsStr;
/// use std::path::PathBuf;
///
/// let event = ChangeEvent::new(EventKind::Remove, PathBuf::from("/w/a.txt"), Encoding::Hex);
/// assert_eq!(event.name.to_string(), "2f772f612e747874");
/// assert_eq!(event.file_name(), Some(OsStr::new("a.txt")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    /// Update or remove.
    pub kind: EventKind,
    /// Resolved absolute path, exactly as the platform reported it.
    ///
    /// Serialized lossily; `name` carries the exact bytes.
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,
    /// `path` in the session's configured encoding.
    pub name: EncodedName,
}

impl ChangeEvent {
    /// Creates an event, encoding `path` with `encoding`.
    #[must_use]
    pub fn new(kind: EventKind, path: PathBuf, encoding: tw_core::Encoding) -> Self {
        let name = crate::codec::encode_path(&path, encoding);
        Self { kind, path, name }
    }

    /// Returns the file name of the changed entry.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

fn serialize_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

/// Everything a session can tell its caller.
#[derive(Debug)]
pub enum Notification {
    /// A change to a watched entry.
    Change(ChangeEvent),
    /// Initial discovery finished. Sent once, and never by composed sessions.
    Ready,
    /// A runtime failure. The session stays open.
    Error(WatchError),
    /// The session closed. Sent once; nothing follows it.
    Close,
}

impl Notification {
    /// Returns the change event, if this is one.
    #[must_use]
    pub fn as_change(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Change(event) => Some(event),
            _ => None,
        }
    }

    /// Consumes the notification, returning the change event if this is one.
    #[must_use]
    pub fn into_change(self) -> Option<ChangeEvent> {
        match self {
            Self::Change(event) => Some(event),
            _ => None,
        }
    }

    /// Returns `true` for [`Notification::Close`].
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close)
    }
}
