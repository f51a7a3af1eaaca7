//! Native watch handles.
//!
//! A native handle is one non-recursive platform watch on one filesystem
//! entry. Handles report raw events: a [`RawKind`] and the name of the entry
//! that changed relative to the watched directory. The directory tree
//! tracker owns the set of open handles through the [`NativeWatch`] trait;
//! [`NotifyWatch`] implements it on top of the `notify` crate.
//!
//! # Event Flow
//!
//! ```text
//! inotify / FSEvents / ReadDirectoryChangesW
//!        │
//!        ▼
//!  notify callback (watcher thread)
//!        │  RawEvent { origin, kind, name }
//!        ▼
//!  mpsc::UnboundedSender ──► session driver task
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tw_core::{FxHashSet, fx_hash_set};

use crate::error::WatchError;

/// Granularity of a raw notification, mirroring what platforms can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    /// An entry appeared, disappeared, or was renamed.
    Rename,
    /// An entry's content or metadata changed.
    Change,
}

/// A raw notification from one native handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Directory (or entry) the handle is attached to.
    pub origin: PathBuf,
    /// Kind of change.
    pub kind: RawKind,
    /// Name of the changed entry relative to `origin`; empty means the
    /// watched entry itself. Not necessarily valid UTF-8.
    pub name: OsString,
}

/// Result type flowing through the raw event channel.
pub type RawResult = Result<RawEvent, WatchError>;

/// Sending half of the raw event channel.
pub type RawSender = mpsc::UnboundedSender<RawResult>;

impl RawEvent {
    /// Creates a raw event.
    #[must_use]
    pub fn new(origin: impl Into<PathBuf>, kind: RawKind, name: impl Into<OsString>) -> Self {
        Self {
            origin: origin.into(),
            kind,
            name: name.into(),
        }
    }

    /// Resolves the event to the absolute path of the changed entry.
    #[must_use]
    pub fn resolve(&self) -> PathBuf {
        if self.name.is_empty() {
            self.origin.clone()
        } else {
            self.origin.join(&self.name)
        }
    }

    /// Splits a `notify` event into one raw event per affected path.
    ///
    /// Access events carry no change and are dropped, as are the combined
    /// rename notifications that repeat the separate `From`/`To` halves.
    pub(crate) fn from_notify(event: &notify::Event) -> SmallVec<[Self; 2]> {
        let Some(kind) = raw_kind(&event.kind) else {
            return SmallVec::new();
        };

        event
            .paths
            .iter()
            .map(|path| match (path.parent(), path.file_name()) {
                (Some(origin), Some(name)) => Self::new(origin, kind, name),
                _ => Self::new(path, kind, ""),
            })
            .collect()
    }
}

fn raw_kind(kind: &EventKind) -> Option<RawKind> {
    match kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(RawKind::Rename)
        }
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(RawKind::Change),
    }
}

/// The set of native handles a tracker can open and close.
///
/// Opening an already-open path and closing a path that is not open are
/// both no-ops, so the tracker can treat every call as idempotent.
pub trait NativeWatch: Send + 'static {
    /// Opens a non-recursive handle on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if `path` does not exist and
    /// [`WatchError::Native`] if the platform refuses the watch.
    fn open(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Closes the handle on `path`. Never fails.
    fn close(&mut self, path: &Path);

    /// Closes every open handle.
    fn close_all(&mut self);
}

/// [`NativeWatch`] backed by the platform's recommended `notify` watcher.
///
/// All handles of one session share a single watcher instance; each handle
/// is one non-recursive watch registration on it.
pub struct NotifyWatch {
    watcher: RecommendedWatcher,
    open: FxHashSet<PathBuf>,
}

impl std::fmt::Debug for NotifyWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatch")
            .field("open", &self.open.len())
            .finish_non_exhaustive()
    }
}

impl NotifyWatch {
    /// Creates a watcher forwarding raw events to `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Native`] if the platform watcher cannot be
    /// created.
    pub fn new(tx: RawSender) -> Result<Self, WatchError> {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    for raw in RawEvent::from_notify(&event) {
                        if tx.send(Ok(raw)).is_err() {
                            // Session driver is gone
                            return;
                        }
                    }
                }
                Err(error) => {
                    let _ = tx.send(Err(WatchError::Native(error)));
                }
            }
        })?;

        Ok(Self {
            watcher,
            open: fx_hash_set(),
        })
    }
}

impl NativeWatch for NotifyWatch {
    fn open(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.open.contains(path) {
            return Ok(());
        }
        if !path.exists() {
            return Err(WatchError::path_not_found(path));
        }

        match self.watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {}
            Err(notify::Error {
                kind: notify::ErrorKind::PathNotFound,
                ..
            }) => return Err(WatchError::path_not_found(path)),
            Err(err) => return Err(err.add_path(path.to_path_buf()).into()),
        }

        self.open.insert(path.to_owned());
        Ok(())
    }

    fn close(&mut self, path: &Path) {
        if !self.open.remove(path) {
            return;
        }
        // The kernel drops watches on deleted entries by itself
        if let Err(error) = self.watcher.unwatch(path) {
            tracing::trace!(path = %path.display(), error = %error, "Unwatch failed");
        }
    }

    fn close_all(&mut self) {
        let open: Vec<PathBuf> = self.open.iter().cloned().collect();
        for path in open {
            self.close(&path);
        }
    }
}


#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    use super::*;

    fn notify_event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |event, p| event.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_resolve_joins_name() {
        let raw = RawEvent::new("/w/dir", RawKind::Change, "file.txt");
        assert_eq!(raw.resolve(), PathBuf::from("/w/dir/file.txt"));
    }

    #[test]
    fn test_resolve_empty_name_is_self() {
        let raw = RawEvent::new("/w/dir", RawKind::Rename, "");
        assert_eq!(raw.resolve(), PathBuf::from("/w/dir"));
    }

    #[test]
    fn test_from_notify_create_is_rename() {
        let event = notify_event(EventKind::Create(CreateKind::File), &["/w/dir/new.txt"]);
        let raws = RawEvent::from_notify(&event);
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0], RawEvent::new("/w/dir", RawKind::Rename, "new.txt"));
    }

    #[test]
    fn test_from_notify_data_change_is_change() {
        let event = notify_event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/w/a.txt"],
        );
        let raws = RawEvent::from_notify(&event);
        assert_eq!(raws[0].kind, RawKind::Change);
        assert_eq!(raws[0].resolve(), PathBuf::from("/w/a.txt"));
    }

    #[test]
    fn test_from_notify_remove_is_rename() {
        let event = notify_event(EventKind::Remove(RemoveKind::Folder), &["/w/sub"]);
        assert_eq!(RawEvent::from_notify(&event)[0].kind, RawKind::Rename);
    }

    #[test]
    fn test_from_notify_drops_access_and_rename_both() {
        let access = notify_event(EventKind::Access(AccessKind::Any), &["/w/a"]);
        assert!(RawEvent::from_notify(&access).is_empty());

        let both = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a", "/w/b"],
        );
        assert!(RawEvent::from_notify(&both).is_empty());
    }

    #[test]
    fn test_from_notify_root_path_has_empty_name() {
        let event = notify_event(EventKind::Remove(RemoveKind::Any), &["/"]);
        let raws = RawEvent::from_notify(&event);
        assert_eq!(raws[0], RawEvent::new("/", RawKind::Rename, ""));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_notify_keeps_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = Path::new("/w").join(OsStr::from_bytes(b"bad\xff.txt"));
        let event = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let raws = RawEvent::from_notify(&event);

        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].name.as_os_str(), OsStr::from_bytes(b"bad\xff.txt"));
        assert_eq!(raws[0].resolve(), path);
    }

    #[test]
    fn test_notify_watch_open_missing_path() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watch = NotifyWatch::new(tx).unwrap();
        let result = watch.open(Path::new("/nonexistent/treewatch/dir"));
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[test]
    fn test_notify_watch_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watch = NotifyWatch::new(tx).unwrap();

        watch.open(path).unwrap();
        watch.open(path).unwrap();
        watch.close(path);
        watch.close(path);
        watch.close_all();
    }
}
