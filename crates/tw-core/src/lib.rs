//! Core configuration, errors, and utilities for treewatch.
//!
//! This crate provides the foundational types shared across the workspace:
//!
//! - [`WatchOptions`] - the immutable option set resolved once per session
//! - [`Encoding`] - the external representation of reported paths
//! - [`ConfigError`] - configuration parsing and validation failures
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;

pub use config::{DEFAULT_DELAY_MS, Encoding, WatchOptions};
pub use error::ConfigError;
pub use hash::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
