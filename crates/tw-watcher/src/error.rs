//! Error types for the tw-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while constructing or running a watch session.

use std::convert::Infallible;
use std::path::PathBuf;

use tw_core::ConfigError;

/// Errors that can occur during file watching operations.
///
/// # Error Propagation
///
/// - **Construction errors** ([`WatchError::PathNotFound`],
///   [`WatchError::InvalidEncoding`], [`WatchError::InvalidPattern`],
///   [`WatchError::Config`]): returned synchronously from `watch`, before any
///   native watch is opened.
/// - **Runtime errors** ([`WatchError::Native`], [`WatchError::Walk`],
///   [`WatchError::Io`]): delivered as
///   [`Notification::Error`](crate::Notification::Error). They never close
///   the session and never affect sibling sessions of a composed session.
///
/// A caller that never reads notifications (for example one relying only on
/// a listener) will not see runtime errors.
///
/// # Examples
///
/// ```
/// use tw_watcher::WatchError;
///
/// fn handle_error(err: &WatchError) {
///     if err.is_construction_error() {
///         eprintln!("cannot start watching: {err}");
///     } else {
///         eprintln!("watch degraded: {err}");
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch root (or a composed-session member) does not exist.
    #[error("path does not exist: {}", _0.display())]
    PathNotFound(PathBuf),

    /// The requested encoding is not one of `utf8`, `buffer`, `base64`, `hex`.
    #[error("invalid encoding '{0}': expected one of utf8, buffer, base64, hex")]
    InvalidEncoding(String),

    /// A filter pattern is not a valid regular expression.
    #[error("invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Any other invalid option.
    #[error(transparent)]
    Config(ConfigError),

    /// The platform watch primitive failed (for example a watch limit).
    #[error("native watch error: {0}")]
    Native(#[from] notify::Error),

    /// Enumerating a directory subtree failed.
    #[error("failed to walk directory: {0}")]
    Walk(#[from] ignore::Error),

    /// An I/O error occurred while resolving a path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session driver task panicked or was aborted.
    #[error("watch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WatchError {
    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Returns `true` if this error is raised while constructing a session.
    #[inline]
    #[must_use]
    pub const fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound(_)
                | Self::InvalidEncoding(_)
                | Self::InvalidPattern(_)
                | Self::Config(_)
        )
    }

    /// Returns `true` if watching can continue after this error.
    ///
    /// Runtime failures only degrade the watch set; the session keeps
    /// delivering events for everything still watched.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Native(_) | Self::Walk(_) | Self::Io(_)
        )
    }

    /// Returns the filesystem path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::PathNotFound(path) => Some(path),
            Self::Native(err) => err.paths.first().map(PathBuf::as_path),
            Self::InvalidEncoding(_)
            | Self::InvalidPattern(_)
            | Self::Config(_)
            | Self::Walk(_)
            | Self::Io(_)
            | Self::Task(_) => None,
        }
    }
}

impl From<ConfigError> for WatchError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidEncoding(value) => Self::InvalidEncoding(value),
            other => Self::Config(other),
        }
    }
}

impl From<Infallible> for WatchError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
