//! Path filtering for watch events and directory traversal.
//!
//! A [`FileFilter`] is consulted in two places:
//!
//! - by the event pipeline, through [`FileFilter::should_process`], to decide
//!   whether a resolved path is reported at all;
//! - by the directory tree tracker, through [`FileFilter::should_descend`],
//!   to decide whether a directory gets a native handle.
//!
//! By default both questions have the same answer, so a directory rejected by
//! a predicate produces no events for anything beneath it.
//!
//! # Examples
//!
//! ```
//! use tw_watcher::{FileFilter, PatternFilter};
//! use std::path::Path;
//!
//! let filter = PatternFilter::exclude("node_modules").unwrap();
//!
//! assert!(filter.should_process(Path::new("/app/src/index.js")));
//! assert!(!filter.should_process(Path::new("/app/node_modules/x/index.js")));
//! assert!(!filter.should_descend(Path::new("/app/node_modules")));
//! ```

use std::path::Path;
use std::sync::Arc;

use regex::bytes::Regex;
use tw_core::WatchOptions;

use crate::codec::path_bytes;
use crate::error::WatchError;

/// A predicate over resolved absolute paths.
///
/// Filters must be [`Send`] and [`Sync`] because one filter is shared by the
/// session driver task and the traversal in the tree tracker.
///
/// # Examples
///
/// ```
/// use tw_watcher::FileFilter;
/// use std::path::Path;
///
/// struct SkipHidden;
///
/// impl FileFilter for SkipHidden {
///     fn should_process(&self, path: &Path) -> bool {
///         !path
///             .file_name()
///             .is_some_and(|name| name.as_encoded_bytes().starts_with(b"."))
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if a change at `path` should be reported.
    fn should_process(&self, path: &Path) -> bool;

    /// Returns `true` if the directory at `path` should be watched.
    ///
    /// Defaults to [`should_process`](FileFilter::should_process).
    fn should_descend(&self, path: &Path) -> bool {
        self.should_process(path)
    }
}

/// A shareable, type-erased filter.
pub type SharedFilter = Arc<dyn FileFilter>;

/// A filter that accepts every path. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Path) -> bool {
        true
    }
}

/// A regular-expression filter over the absolute path.
///
/// Patterns are unanchored, so a plain word behaves as a substring match.
/// They run against the raw path bytes, so non-UTF-8 paths are matched
/// too.
///
/// - [`PatternFilter::include`]: only matching paths are reported. Include
///   patterns never stop descent; otherwise a pattern such as `\.rs$` would
///   prevent watching any directory at all.
/// - [`PatternFilter::exclude`]: matching paths are neither reported nor
///   descended into.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    pattern: Regex,
    exclude: bool,
}

impl PatternFilter {
    /// Creates a filter reporting only paths that match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidPattern`] if `pattern` is not a valid
    /// regular expression.
    pub fn include(pattern: &str) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            exclude: false,
        })
    }

    /// Creates a filter dropping every path that matches `pattern`.
    pub fn exclude(pattern: &str) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            exclude: true,
        })
    }

    /// Returns the pattern source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl FileFilter for PatternFilter {
    fn should_process(&self, path: &Path) -> bool {
        self.pattern.is_match(&path_bytes(path)) != self.exclude
    }

    fn should_descend(&self, path: &Path) -> bool {
        !self.exclude || !self.pattern.is_match(&path_bytes(path))
    }
}

/// A filter built from a closure.
///
/// The same closure answers both [`FileFilter`] questions.
///
/// # Examples
///
/// ```
/// use tw_watcher::{FileFilter, PredicateFilter};
/// use std::path::Path;
///
/// let filter = PredicateFilter::new(|path: &Path| !path.to_string_lossy().contains("target"));
/// assert!(!filter.should_descend(Path::new("/crate/target")));
/// ```
pub struct PredicateFilter<F> {
    predicate: F,
}

impl<F> PredicateFilter<F>
where
    F: Fn(&Path) -> bool + Send + Sync + 'static,
{
    /// Wraps `predicate`.
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> std::fmt::Debug for PredicateFilter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateFilter").finish_non_exhaustive()
    }
}

impl<F> FileFilter for PredicateFilter<F>
where
    F: Fn(&Path) -> bool + Send + Sync + 'static,
{
    fn should_process(&self, path: &Path) -> bool {
        (self.predicate)(path)
    }
}

/// A composite filter that combines multiple filters with AND logic.
///
/// # Examples
///
/// ```
/// use tw_watcher::{CompositeFilter, FileFilter, PatternFilter};
/// use std::path::Path;
///
/// let filter = CompositeFilter::new()
///     .and(PatternFilter::include(r"\.rs$").unwrap())
///     .and(PatternFilter::exclude("target").unwrap());
///
/// assert!(filter.should_process(Path::new("/crate/src/lib.rs")));
/// assert!(!filter.should_process(Path::new("/crate/target/build.rs")));
/// assert!(filter.should_descend(Path::new("/crate/src")));
/// ```
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn FileFilter>>,
}

impl CompositeFilter {
    /// Creates a new empty composite filter, which accepts every path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Adds a filter to the composite.
    #[must_use]
    pub fn and<F: FileFilter>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Builds the pattern filters named by `options`.
    pub fn from_options(options: &WatchOptions) -> Result<Self, WatchError> {
        let mut filter = Self::new();
        if let Some(pattern) = &options.filter {
            filter = filter.and(PatternFilter::include(pattern)?);
        }
        for pattern in &options.exclude {
            filter = filter.and(PatternFilter::exclude(pattern)?);
        }
        Ok(filter)
    }

    /// Returns `true` if no filters have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FileFilter for CompositeFilter {
    fn should_process(&self, path: &Path) -> bool {
        self.filters.iter().all(|f| f.should_process(path))
    }

    fn should_descend(&self, path: &Path) -> bool {
        self.filters.iter().all(|f| f.should_descend(path))
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Path) -> bool {
        (**self).should_process(path)
    }

    fn should_descend(&self, path: &Path) -> bool {
        (**self).should_descend(path)
    }
}

impl<F: FileFilter + ?Sized> FileFilter for Arc<F> {
    fn should_process(&self, path: &Path) -> bool {
        (**self).should_process(path)
    }

    fn should_descend(&self, path: &Path) -> bool {
        (**self).should_descend(path)
    }
}
