//! Directory tree tracking.
//!
//! [`DirectoryTree`] keeps exactly one native handle open per watched
//! directory and reconciles that set against the raw events the handles
//! themselves produce:
//!
//! - a raw event naming an existing, untracked directory under a recursive
//!   root opens a handle for it and queues it for exploration;
//! - a raw event naming a tracked directory that no longer exists closes its
//!   handle and the handles of everything tracked beneath it.
//!
//! The tracked set is a plain table keyed by absolute path. It is only
//! mutated by the session driver, and opening or closing an entry is
//! idempotent.
//!
//! # Blocking Work
//!
//! [`start`](DirectoryTree::start) and
//! [`explore_pending`](DirectoryTree::explore_pending) walk directory
//! subtrees and register one native watch per directory. Both block; the
//! session driver runs them on tokio's blocking pool, never on an async
//! worker. [`process`](DirectoryTree::process) only stats the changed path
//! and opens at most one handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use smallvec::SmallVec;
use tw_core::{FxHashSet, fx_hash_set};

use crate::error::WatchError;
use crate::filter::SharedFilter;
use crate::native::{NativeWatch, RawEvent};

/// What a session watches at its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchScope {
    /// A single file, watched through its parent directory.
    File,
    /// A directory and its direct children.
    Directory,
    /// A directory and everything nested beneath it.
    Recursive,
}

/// The live set of watched directories for one session.
pub struct DirectoryTree<W> {
    root: PathBuf,
    scope: WatchScope,
    filter: SharedFilter,
    watch: W,
    tracked: FxHashSet<PathBuf>,
    unexplored: Vec<PathBuf>,
    failures: Vec<WatchError>,
}

impl<W> std::fmt::Debug for DirectoryTree<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryTree")
            .field("root", &self.root)
            .field("scope", &self.scope)
            .field("tracked", &self.tracked.len())
            .field("unexplored", &self.unexplored.len())
            .finish_non_exhaustive()
    }
}

impl<W: NativeWatch> DirectoryTree<W> {
    /// Creates an empty tracker. Nothing is watched until [`start`](Self::start).
    pub fn new(root: PathBuf, scope: WatchScope, filter: SharedFilter, watch: W) -> Self {
        Self {
            root,
            scope,
            filter,
            watch,
            tracked: fx_hash_set(),
            unexplored: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns the watch root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the scope of this tracker.
    #[must_use]
    pub const fn scope(&self) -> WatchScope {
        self.scope
    }

    /// Builds the initial watch set. Blocks for the whole subtree walk.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle on the root (or, for a file, on its
    /// parent directory) cannot be opened. Failures on nested directories are
    /// collected and returned by [`drain_failures`](Self::drain_failures).
    pub fn start(&mut self) -> Result<(), WatchError> {
        let root = self.root.clone();
        match self.scope {
            WatchScope::File => {
                let parent = root.parent().unwrap_or(&root);
                self.track(parent)?;
            }
            WatchScope::Directory => {
                self.track(&root)?;
            }
            WatchScope::Recursive => {
                self.track(&root)?;
                self.descend(&root);
            }
        }

        tracing::debug!(root = %self.root.display(), tracked = self.tracked.len(), "Initial discovery complete");
        Ok(())
    }

    /// Resolves a raw event, updating the watch set as needed.
    ///
    /// Returns the resolved path when the event concerns this session's
    /// root, or `None` when it should be ignored. A newly tracked directory
    /// is queued; its subdirectories are only watched once
    /// [`explore_pending`](Self::explore_pending) runs.
    pub fn process(&mut self, raw: &RawEvent) -> Option<PathBuf> {
        let path = raw.resolve();
        match self.scope {
            WatchScope::File => (path == self.root).then_some(path),
            WatchScope::Directory => {
                let relevant = path == self.root || path.parent() == Some(self.root.as_path());
                relevant.then_some(path)
            }
            WatchScope::Recursive => {
                if !path.starts_with(&self.root) {
                    return None;
                }
                self.reconcile(&path);
                Some(path)
            }
        }
    }

    /// Returns `true` if newly tracked directories still await exploration.
    #[must_use]
    pub fn has_unexplored(&self) -> bool {
        !self.unexplored.is_empty()
    }

    /// Walks every queued directory and tracks its subdirectories. Blocks.
    pub fn explore_pending(&mut self) {
        while let Some(dir) = self.unexplored.pop() {
            // Retired while queued
            if self.tracked.contains(&dir) {
                self.descend(&dir);
            }
        }
    }

    /// Returns the currently tracked directories, sorted.
    #[must_use]
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.tracked.iter().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns `true` if `path` has an open handle.
    #[must_use]
    pub fn is_tracked(&self, path: &Path) -> bool {
        self.tracked.contains(path)
    }

    /// Takes the non-fatal failures collected since the last call.
    pub fn drain_failures(&mut self) -> Vec<WatchError> {
        std::mem::take(&mut self.failures)
    }

    /// Closes every handle.
    pub fn close(&mut self) {
        self.watch.close_all();
        self.tracked.clear();
        self.unexplored.clear();
    }

    fn reconcile(&mut self, path: &Path) {
        let is_dir = path.symlink_metadata().is_ok_and(|meta| meta.is_dir());

        if self.tracked.contains(path) {
            if !is_dir {
                self.retire(path);
            }
            return;
        }

        let under_tracked = path.parent().is_some_and(|parent| self.tracked.contains(parent));
        if !is_dir || !under_tracked || !self.filter.should_descend(path) {
            return;
        }

        match self.track(path) {
            Ok(true) => self.unexplored.push(path.to_path_buf()),
            Ok(false) => {}
            Err(err) => self.fail(err),
        }
    }

    /// Opens a handle on `dir`; `Ok(false)` if it was already tracked.
    fn track(&mut self, dir: &Path) -> Result<bool, WatchError> {
        if self.tracked.contains(dir) {
            return Ok(false);
        }
        self.watch.open(dir)?;
        self.tracked.insert(dir.to_path_buf());
        tracing::debug!(dir = %dir.display(), "Tracking directory");
        Ok(true)
    }

    /// Tracks every directory below `dir` the filter lets us descend into.
    fn descend(&mut self, dir: &Path) {
        let filter = Arc::clone(&self.filter);
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_some_and(|ft| ft.is_dir())
                    || filter.should_descend(entry.path())
            })
            .build();

        for result in walker {
            match result {
                Ok(entry) => {
                    if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                        continue;
                    }
                    if let Err(err) = self.track(entry.path()) {
                        self.fail(err);
                    }
                }
                Err(err) => self.fail(err.into()),
            }
        }
    }

    /// Closes `dir` and everything tracked beneath it.
    fn retire(&mut self, dir: &Path) {
        let retired: SmallVec<[PathBuf; 4]> = self
            .tracked
            .iter()
            .filter(|tracked| tracked.starts_with(dir))
            .cloned()
            .collect();

        for path in retired {
            self.watch.close(&path);
            self.tracked.remove(&path);
            tracing::debug!(dir = %path.display(), "Retired directory");
        }
    }

    fn fail(&mut self, err: WatchError) {
        let vanished = match &err {
            WatchError::PathNotFound(_) => true,
            WatchError::Walk(walk) => walk
                .io_error()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound),
            _ => false,
        };

        if vanished {
            // Raced with a removal; the removal event retires it
            tracing::trace!(error = %err, "Directory vanished during traversal");
        } else {
            tracing::warn!(error = %err, "Failed to watch directory");
            self.failures.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::filter::{AcceptAllFilter, PatternFilter};
    use crate::native::RawKind;
    use crate::native::testing::MemoryWatch;

    fn temp_root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    fn tree(root: &Path, scope: WatchScope, filter: SharedFilter) -> (DirectoryTree<MemoryWatch>, MemoryWatch) {
        let watch = MemoryWatch::default();
        (
            DirectoryTree::new(root.to_owned(), scope, filter, watch.clone()),
            watch,
        )
    }

    #[test]
    fn test_recursive_start_tracks_every_directory() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("d")).unwrap();
        fs::write(root.join("a/file.txt"), "x").unwrap();

        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();

        let expected = vec![
            root.clone(),
            root.join("a"),
            root.join("a/b"),
            root.join("a/b/c"),
            root.join("d"),
        ];
        assert_eq!(tree.tracked_paths(), expected);
        assert_eq!(watch.open_paths(), expected);
        assert!(tree.drain_failures().is_empty());
    }

    #[test]
    fn test_recursive_start_skips_filtered_subtree() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("ignored/inner")).unwrap();
        fs::create_dir_all(root.join("kept")).unwrap();

        let filter = Arc::new(PatternFilter::exclude("ignored").unwrap());
        let (mut tree, watch) = tree(&root, WatchScope::Recursive, filter);
        tree.start().unwrap();

        assert!(tree.is_tracked(&root.join("kept")));
        assert!(!tree.is_tracked(&root.join("ignored")));
        assert!(!watch.is_open(&root.join("ignored/inner")));
    }

    #[test]
    fn test_directory_scope_tracks_root_only() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("sub")).unwrap();

        let (mut tree, _watch) = tree(&root, WatchScope::Directory, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        assert_eq!(tree.tracked_paths(), vec![root.clone()]);

        let child = RawEvent::new(root.clone(), RawKind::Change, "file.txt");
        assert_eq!(tree.process(&child), Some(root.join("file.txt")));

        let nested = RawEvent::new(root.join("sub"), RawKind::Change, "deep.txt");
        assert_eq!(tree.process(&nested), None);
    }

    #[test]
    fn test_file_scope_watches_parent_and_filters_names() {
        let (_dir, root) = temp_root();
        let file = root.join("watched.txt");
        fs::write(&file, "x").unwrap();

        let (mut tree, watch) = tree(&file, WatchScope::File, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        assert!(watch.is_open(&root));

        let hit = RawEvent::new(root.clone(), RawKind::Change, "watched.txt");
        assert_eq!(tree.process(&hit), Some(file.clone()));

        let miss = RawEvent::new(root.clone(), RawKind::Change, "other.txt");
        assert_eq!(tree.process(&miss), None);
    }

    #[test]
    fn test_new_directory_is_tracked_with_its_subtree() {
        let (_dir, root) = temp_root();
        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        assert!(!tree.has_unexplored());

        fs::create_dir_all(root.join("new/inner")).unwrap();
        let raw = RawEvent::new(root.clone(), RawKind::Rename, "new");

        assert_eq!(tree.process(&raw), Some(root.join("new")));
        assert!(watch.is_open(&root.join("new")));
        assert!(tree.has_unexplored());
        assert!(!watch.is_open(&root.join("new/inner")));

        tree.explore_pending();
        assert!(!tree.has_unexplored());
        assert!(watch.is_open(&root.join("new/inner")));
    }

    #[test]
    fn test_directory_removed_before_exploration_is_skipped() {
        let (_dir, root) = temp_root();
        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();

        fs::create_dir_all(root.join("brief/inner")).unwrap();
        tree.process(&RawEvent::new(root.clone(), RawKind::Rename, "brief"));
        fs::remove_dir_all(root.join("brief")).unwrap();
        tree.process(&RawEvent::new(root.clone(), RawKind::Rename, "brief"));

        tree.explore_pending();
        assert_eq!(watch.open_paths(), vec![root.clone()]);
        assert!(tree.drain_failures().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_directory_is_tracked() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, root) = temp_root();
        let name = OsStr::from_bytes(b"dir\xfe");
        fs::create_dir_all(root.join(name).join("inner")).unwrap();

        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        assert!(watch.is_open(&root.join(name)));
        assert!(watch.is_open(&root.join(name).join("inner")));

        let raw = RawEvent::new(root.join(name), RawKind::Change, OsStr::from_bytes(b"f\xff"));
        assert_eq!(tree.process(&raw), Some(root.join(name).join(OsStr::from_bytes(b"f\xff"))));
    }

    #[test]
    fn test_new_filtered_directory_is_forwarded_but_not_tracked() {
        let (_dir, root) = temp_root();
        let filter = Arc::new(PatternFilter::exclude("ignored").unwrap());
        let (mut tree, watch) = tree(&root, WatchScope::Recursive, filter);
        tree.start().unwrap();

        fs::create_dir(root.join("ignored")).unwrap();
        let raw = RawEvent::new(root.clone(), RawKind::Rename, "ignored");

        assert_eq!(tree.process(&raw), Some(root.join("ignored")));
        assert!(!watch.is_open(&root.join("ignored")));
    }

    #[test]
    fn test_removed_directory_is_retired_with_descendants() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("gone/deeper")).unwrap();
        fs::create_dir_all(root.join("stays")).unwrap();

        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        assert!(tree.is_tracked(&root.join("gone/deeper")));

        fs::remove_dir_all(root.join("gone")).unwrap();
        let raw = RawEvent::new(root.clone(), RawKind::Rename, "gone");

        assert_eq!(tree.process(&raw), Some(root.join("gone")));
        assert!(!tree.is_tracked(&root.join("gone")));
        assert!(!watch.is_open(&root.join("gone/deeper")));
        assert!(tree.is_tracked(&root.join("stays")));
    }

    #[test]
    fn test_file_events_do_not_change_watch_set() {
        let (_dir, root) = temp_root();
        let (mut tree, _watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();

        fs::write(root.join("plain.txt"), "x").unwrap();
        let raw = RawEvent::new(root.clone(), RawKind::Rename, "plain.txt");

        assert_eq!(tree.process(&raw), Some(root.join("plain.txt")));
        assert_eq!(tree.tracked_paths(), vec![root.clone()]);
    }

    #[test]
    fn test_event_outside_root_is_ignored() {
        let (_dir, root) = temp_root();
        let (mut tree, _watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();

        let raw = RawEvent::new("/somewhere/else", RawKind::Change, "x");
        assert_eq!(tree.process(&raw), None);
    }

    #[test]
    fn test_start_fails_for_missing_root() {
        let (_dir, root) = temp_root();
        let missing = root.join("missing");
        let (mut tree, _watch) = tree(&missing, WatchScope::Directory, Arc::new(AcceptAllFilter));
        assert!(matches!(tree.start(), Err(WatchError::PathNotFound(_))));
    }

    #[test]
    fn test_close_releases_every_handle() {
        let (_dir, root) = temp_root();
        fs::create_dir_all(root.join("a/b")).unwrap();

        let (mut tree, watch) = tree(&root, WatchScope::Recursive, Arc::new(AcceptAllFilter));
        tree.start().unwrap();
        tree.close();
        tree.close();

        assert!(tree.tracked_paths().is_empty());
        assert!(watch.open_paths().is_empty());
    }
}
