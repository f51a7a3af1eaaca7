//! Recursive filesystem change notifier with debouncing and composed
//! sessions.
//!
//! This crate turns per-directory native notifications from the `notify`
//! crate into a stream of debounced, path-resolved, optionally filtered
//! [`ChangeEvent`]s, keeping the set of native watches in sync with the
//! directory tree as it changes.
//!
//! # Overview
//!
//! - [`watch`] watches one file or directory, or composes several roots into
//!   one stream with cross-root dedup.
//! - Directories are watched non-recursively, one native handle each; a
//!   recursive session adds and retires handles as subdirectories appear and
//!   disappear.
//! - Bursts of raw events for a path collapse into one event fired `delay`
//!   after the last raw event.
//! - Each event is classified as [`EventKind::Update`] or
//!   [`EventKind::Remove`] by checking existence at emission time, and its
//!   path is encoded as requested ([`Encoding`](tw_core::Encoding)).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 notify watcher thread (per driver)               │
//! │   RecommendedWatcher ──► RawEvent { origin, kind, name }         │
//! └───────────────────────────────────┬──────────────────────────────┘
//!                                     │ mpsc::UnboundedSender
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    driver task (tokio, one per root)             │
//! │  DirectoryTree ──► FileFilter ──► Debouncer ──► classify/encode  │
//! └───────────────────────────────────┬──────────────────────────────┘
//!                                     │ Delivery (lock, dedup, close)
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │         caller: Watcher::recv() or a listener callback           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! tw-cli ──► tw-watcher ──► tw-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tw_watcher::{Notification, watch};
//! use tw_core::WatchOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = WatchOptions::default().with_recursive(true).with_exclude("target");
//!     let mut watcher = watch(".", options).await?;
//!
//!     while let Some(notification) = watcher.recv().await {
//!         match notification {
//!             Notification::Ready => println!("watching"),
//!             Notification::Change(event) => println!("{} {}", event.kind, event.name),
//!             Notification::Error(err) => eprintln!("{err}"),
//!             Notification::Close => break,
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Construction errors are returned by [`watch`]. Everything that goes wrong
//! afterwards arrives as [`Notification::Error`] and leaves the session open;
//! callers that never receive notifications will not see it.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod codec;
pub mod composed;
pub mod debounce;
pub mod delivery;
pub mod error;
pub mod events;
pub mod filter;
pub mod native;
pub mod session;
pub mod tree;
pub mod watcher;

// Re-export error types
pub use error::WatchError;

// Re-export event types
pub use codec::{DecodeError, EncodedName, encode, encode_path, path_bytes};
pub use events::{ChangeEvent, EventKind, Notification, classify};

// Re-export filter types
pub use filter::{AcceptAllFilter, CompositeFilter, FileFilter, PatternFilter, PredicateFilter, SharedFilter};

// Re-export session types
pub use composed::ComposedSession;
pub use delivery::{COMPOSED_DEDUP_WINDOW, Listener, SessionState};
pub use session::WatchSession;
pub use watcher::{WatchBuilder, WatchPaths, Watcher, watch};
