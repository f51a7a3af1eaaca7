//! The `watch` entry point.
//!
//! [`watch`] takes one path or a list of paths plus options and returns a
//! [`Watcher`]: a [`WatchSession`] for a single path, a [`ComposedSession`]
//! for a list. [`WatchBuilder`] exposes the same construction with a custom
//! [`FileFilter`] and a change listener.
//!
//! Construction validates everything up front. An unknown encoding, an
//! invalid pattern or a missing path fails before any native watch is opened
//! or any task is spawned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::mpsc;
use tw_core::{ConfigError, WatchOptions};

use crate::codec::EncodedName;
use crate::composed::ComposedSession;
use crate::delivery::{Listener, SessionState};
use crate::error::WatchError;
use crate::events::{EventKind, Notification};
use crate::filter::{CompositeFilter, FileFilter, SharedFilter};
use crate::session::{WatchSession, WatchTarget};

/// One path, or an ordered list of paths to compose.
///
/// A list always produces a [`ComposedSession`], even with one element.
///
/// # Examples
///
/// ```
/// use tw_watcher::WatchPaths;
///
/// assert!(!WatchPaths::from("./src").is_many());
/// assert!(WatchPaths::from(["./src", "./tests"]).is_many());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPaths {
    /// A single root.
    One(PathBuf),
    /// Several roots behind one stream.
    Many(Vec<PathBuf>),
}

impl WatchPaths {
    /// Creates a single root from raw path bytes, which need not be UTF-8.
    #[cfg(unix)]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        use std::os::unix::ffi::OsStrExt;
        Self::One(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }

    /// Returns the requested paths in order.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            Self::One(path) => std::slice::from_ref(path),
            Self::Many(paths) => paths,
        }
    }

    /// Returns `true` if this requests a composed session.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::Many(_))
    }
}

impl From<&str> for WatchPaths {
    fn from(path: &str) -> Self {
        Self::One(PathBuf::from(path))
    }
}

impl From<String> for WatchPaths {
    fn from(path: String) -> Self {
        Self::One(PathBuf::from(path))
    }
}

impl From<&Path> for WatchPaths {
    fn from(path: &Path) -> Self {
        Self::One(path.to_path_buf())
    }
}

impl From<PathBuf> for WatchPaths {
    fn from(path: PathBuf) -> Self {
        Self::One(path)
    }
}

impl From<&Utf8Path> for WatchPaths {
    fn from(path: &Utf8Path) -> Self {
        Self::One(path.as_std_path().to_path_buf())
    }
}

impl From<Utf8PathBuf> for WatchPaths {
    fn from(path: Utf8PathBuf) -> Self {
        Self::One(path.into_std_path_buf())
    }
}

impl<P: Into<PathBuf>> From<Vec<P>> for WatchPaths {
    fn from(paths: Vec<P>) -> Self {
        Self::Many(paths.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<PathBuf>, const N: usize> From<[P; N]> for WatchPaths {
    fn from(paths: [P; N]) -> Self {
        Self::Many(paths.into_iter().map(Into::into).collect())
    }
}

/// A running watch over one or several roots.
#[derive(Debug)]
pub enum Watcher {
    /// Watch on a single root.
    Session(WatchSession),
    /// Watch on several roots.
    Composed(ComposedSession),
}

impl Watcher {
    /// Returns `true` for a composed session.
    #[must_use]
    pub const fn is_composed(&self) -> bool {
        matches!(self, Self::Composed(_))
    }

    /// Returns the canonical roots being watched.
    #[must_use]
    pub fn roots(&self) -> Vec<&Path> {
        match self {
            Self::Session(session) => vec![session.root()],
            Self::Composed(composed) => composed.roots().iter().map(PathBuf::as_path).collect(),
        }
    }

    /// Receives the next notification.
    ///
    /// Returns `None` after [`Notification::Close`] has been returned.
    pub async fn recv(&mut self) -> Option<Notification> {
        match self {
            Self::Session(session) => session.recv().await,
            Self::Composed(composed) => composed.recv().await,
        }
    }

    /// Receives a notification without waiting.
    pub fn try_recv(&mut self) -> Result<Notification, mpsc::error::TryRecvError> {
        match self {
            Self::Session(session) => session.try_recv(),
            Self::Composed(composed) => composed.try_recv(),
        }
    }

    /// Stops watching. Idempotent.
    pub fn close(&self) {
        match self {
            Self::Session(session) => session.close(),
            Self::Composed(composed) => composed.close(),
        }
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Session(session) => session.is_closed(),
            Self::Composed(composed) => composed.is_closed(),
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self {
            Self::Session(session) => session.state(),
            Self::Composed(composed) => composed.state(),
        }
    }

    /// Returns the directories currently backed by native handles.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Session(session) => session.watched_paths().await,
            Self::Composed(composed) => composed.watched_paths().await,
        }
    }

    /// Closes and waits for every driver task.
    pub async fn shutdown(self) -> Result<(), WatchError> {
        match self {
            Self::Session(session) => session.shutdown().await,
            Self::Composed(composed) => composed.shutdown().await,
        }
    }
}

/// Builder for watches that need a custom filter or a listener.
///
/// # Examples
///
/// ```no_run
/// use tw_watcher::{PredicateFilter, WatchBuilder};
/// use tw_core::WatchOptions;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), tw_watcher::WatchError> {
/// let watcher = WatchBuilder::new("./src")
///     .options(WatchOptions::default().with_recursive(true))
///     .filter(PredicateFilter::new(|path: &Path| !path.ends_with("target")))
///     .listener(|kind, name| println!("{kind} {name}"))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct WatchBuilder {
    paths: WatchPaths,
    options: WatchOptions,
    filter: Option<SharedFilter>,
    listener: Option<Listener>,
}

impl fmt::Debug for WatchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchBuilder")
            .field("paths", &self.paths)
            .field("options", &self.options)
            .field("filter", &self.filter.is_some())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl WatchBuilder {
    /// Starts a builder for `paths` with default options.
    #[must_use]
    pub fn new(paths: impl Into<WatchPaths>) -> Self {
        Self {
            paths: paths.into(),
            options: WatchOptions::default(),
            filter: None,
            listener: None,
        }
    }

    /// Sets the options.
    #[must_use]
    pub fn options(mut self, options: WatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a filter, combined with the option patterns using AND.
    #[must_use]
    pub fn filter(mut self, filter: impl FileFilter) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Routes changes to `listener` instead of [`Notification::Change`].
    ///
    /// Ready, error and close notifications still go through `recv`.
    #[must_use]
    pub fn listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(EventKind, &EncodedName) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Validates everything and starts watching.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] for a missing path,
    /// [`WatchError::InvalidPattern`] for a bad filter pattern,
    /// [`WatchError::Config`] for an empty path list, and
    /// [`WatchError::Native`] if the platform watcher cannot be created.
    #[allow(clippy::unused_async)] // Async for API consistency with shutdown()
    pub async fn build(self) -> Result<Watcher, WatchError> {
        let Self {
            paths,
            options,
            filter: custom,
            listener,
        } = self;

        if paths.paths().is_empty() {
            return Err(ConfigError::invalid_option("paths", "at least one path is required").into());
        }

        let mut filter = CompositeFilter::from_options(&options)?;
        if let Some(custom) = custom {
            filter = filter.and(custom);
        }
        let filter: SharedFilter = Arc::new(filter);

        let targets = paths
            .paths()
            .iter()
            .map(|path| WatchTarget::resolve(path, &options))
            .collect::<Result<Vec<_>, _>>()?;

        let watcher = match (&paths, targets.as_slice()) {
            (WatchPaths::One(_), [target]) => {
                Watcher::Session(WatchSession::spawn(target, filter, listener)?)
            }
            _ => Watcher::Composed(ComposedSession::spawn(&targets, &filter, listener)?),
        };

        tracing::debug!(roots = ?watcher.roots(), "Watcher built");
        Ok(watcher)
    }
}

/// Watches `paths` with `options`.
///
/// `options` is a [`WatchOptions`], an [`Encoding`](tw_core::Encoding), or a
/// bare encoding string such as `"hex"`.
///
/// # Errors
///
/// Returns [`WatchError::InvalidEncoding`] for an unknown encoding string and
/// [`WatchError::PathNotFound`] for a missing path, before anything is
/// watched. See [`WatchBuilder::build`] for the rest.
///
/// Runtime failures are delivered as [`Notification::Error`]; a caller that
/// never calls `recv` will not see them.
///
/// # Examples
///
/// ```no_run
/// use tw_watcher::{Notification, watch};
///
/// # async fn example() -> Result<(), tw_watcher::WatchError> {
/// let mut watcher = watch("./Cargo.toml", "base64").await?;
/// if let Some(Notification::Change(event)) = watcher.recv().await {
///     println!("{}", event.name);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn watch<P, O>(paths: P, options: O) -> Result<Watcher, WatchError>
where
    P: Into<WatchPaths>,
    O: TryInto<WatchOptions>,
    O::Error: Into<WatchError>,
{
    let options = options.try_into().map_err(Into::into)?;
    WatchBuilder::new(paths).options(options).build().await
}

#[cfg(test)]
mod tests {
    use tw_core::Encoding;

    use super::*;

    #[test]
    fn test_watch_paths_conversions() {
        assert_eq!(WatchPaths::from("a"), WatchPaths::One(PathBuf::from("a")));
        assert_eq!(
            WatchPaths::from(Utf8PathBuf::from("a")),
            WatchPaths::One(PathBuf::from("a"))
        );
        assert_eq!(
            WatchPaths::from(vec!["a", "b"]).paths(),
            &[PathBuf::from("a"), PathBuf::from("b")]
        );
        assert!(WatchPaths::from(["a"]).is_many());
    }

    #[cfg(unix)]
    #[test]
    fn test_watch_paths_from_bytes() {
        assert_eq!(
            WatchPaths::from_bytes(b"/tmp/x"),
            WatchPaths::One(PathBuf::from("/tmp/x"))
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_watch_accepts_non_utf8_root_bytes() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap().join(std::ffi::OsStr::from_bytes(b"d\xfe"));
        std::fs::create_dir(&root).unwrap();

        let watcher = watch(WatchPaths::from_bytes(root.as_os_str().as_bytes()), Encoding::Buffer)
            .await
            .unwrap();
        assert_eq!(watcher.roots(), vec![root.as_path()]);
        watcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_rejects_invalid_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let result = watch(dir.path(), "latin1").await;
        assert!(matches!(result, Err(WatchError::InvalidEncoding(ref v)) if v == "latin1"));
    }

    #[tokio::test]
    async fn test_watch_rejects_missing_path() {
        let result = watch("/nonexistent/treewatch/path", WatchOptions::default()).await;
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_rejects_missing_composed_member() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = watch(vec![dir.path().to_path_buf(), missing], Encoding::Utf8).await;
        assert!(matches!(result, Err(WatchError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_rejects_empty_path_list() {
        let result = watch(Vec::<PathBuf>::new(), WatchOptions::default()).await;
        assert!(matches!(result, Err(WatchError::Config(_))));
    }

    #[tokio::test]
    async fn test_watch_rejects_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let options = WatchOptions::default().with_filter("(");
        let result = watch(dir.path(), options).await;
        assert!(matches!(result, Err(WatchError::InvalidPattern(_))));
    }

    #[tokio::test]
    async fn test_single_and_composed_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let single = watch(dir.path(), WatchOptions::default()).await.unwrap();
        assert!(!single.is_composed());
        assert_eq!(single.roots().len(), 1);
        single.shutdown().await.unwrap();

        let composed = watch([dir.path()], WatchOptions::default()).await.unwrap();
        assert!(composed.is_composed());
        composed.shutdown().await.unwrap();
    }
}
