//! Fast hash map and hash set type aliases.
//!
//! The watcher keys its tracked-directory table, its debounce table, and the
//! composed-session dedup window by absolute path. Those tables are internal
//! and never exposed to untrusted input, so the Fx hash from `rustc-hash` is
//! used instead of the DoS-resistant std hasher.
//!
//! # Examples
//!
//! ```
//! use tw_core::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
//!
//! let mut map: FxHashMap<String, u32> = fx_hash_map();
//! map.insert("/tmp/a".to_owned(), 1);
//!
//! let set: FxHashSet<&str> = fx_hash_set();
//! assert!(set.is_empty());
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Creates a new empty [`FxHashSet`].
#[inline]
#[must_use]
pub fn fx_hash_set<V>() -> FxHashSet<V> {
    FxHashSet::default()
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;

    #[test]
    fn test_fx_hash_map_keyed_by_path() {
        let mut map: FxHashMap<PathBuf, usize> = fx_hash_map();
        map.insert("/watch/root".into(), 1);
        *map.entry("/watch/root".into()).or_insert(0) += 1;
        assert_eq!(map.get(Path::new("/watch/root")), Some(&2));
    }

    #[test]
    fn test_fx_hash_set_dedups() {
        let mut set: FxHashSet<&str> = fx_hash_set();
        assert!(set.insert("/a"));
        assert!(!set.insert("/a"));
        assert_eq!(set.len(), 1);
    }
}
