//! Directory listing cache.
//!
//! Maps a normalised directory path to the entries last listed under it.
//! Only positive listings are stored. A path absent from a cached parent
//! listing is nevertheless a confirmed miss, which lets stat answer
//! `NotFound` without a remote call.

use super::entry::Entry;
use super::path::{normalize, parent};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of answering a path from cached listings alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Nothing cached for the path or its parent.
    Miss,
    /// The path's own listing, or its entry in the parent listing.
    Listing(Vec<Entry>),
    /// The parent listing is cached and does not contain the path.
    Absent,
}

#[derive(Default)]
pub struct DirCache {
    listings: Mutex<HashMap<String, Vec<Entry>>>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    // listings stay consistent even if a holder panicked
    fn listings(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, path: &str) -> Option<Vec<Entry>> {
        self.listings().get(&normalize(path)).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.listings().contains_key(&normalize(path))
    }

    pub fn insert(&self, path: &str, entries: Vec<Entry>) {
        self.listings().insert(normalize(path), entries);
    }

    /// Inserts only when nothing is cached for `path` yet.
    pub fn insert_if_absent(&self, path: &str, entries: Vec<Entry>) {
        self.listings()
            .entry(normalize(path))
            .or_insert(entries);
    }

    /// `Some(true)` if the cached listing of `dir` has an entry named `name`,
    /// `None` if `dir` is not cached.
    pub fn lists(&self, dir: &str, name: &str) -> Option<bool> {
        let listings = self.listings();
        listings
            .get(&normalize(dir))
            .map(|entries| entries.iter().any(|e| e.name == name))
    }

    /// Drops `path` and every ancestor up to the root; `None` clears everything.
    pub fn invalidate(&self, path: Option<&str>) {
        let mut listings = self.listings();
        let Some(path) = path else {
            listings.clear();
            return;
        };
        let mut current = normalize(path);
        loop {
            listings.remove(&current);
            if current.is_empty() {
                break;
            }
            current = parent(&current);
        }
    }

    pub fn ls_from_cache(&self, path: &str) -> CacheLookup {
        let path = normalize(path);
        let listings = self.listings();
        if let Some(own) = listings.get(&path) {
            return CacheLookup::Listing(own.clone());
        }
        let Some(siblings) = listings.get(&parent(&path)) else {
            return CacheLookup::Miss;
        };
        let found: Vec<Entry> = siblings
            .iter()
            .filter(|e| e.name == path)
            .cloned()
            .collect();
        if found.is_empty() {
            CacheLookup::Absent
        } else {
            CacheLookup::Listing(found)
        }
    }

    pub fn len(&self) -> usize {
        self.listings().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::entry::EntryKind;

    fn file(name: &str) -> Entry {
        Entry {
            kind: EntryKind::File,
            size: 1,
            ..Entry::directory(name)
        }
    }

    #[test]
    fn test_invalidate_walks_ancestors_only() {
        let cache = DirCache::new();
        for p in ["", "a", "a/b", "a/b/c", "a/d"] {
            cache.insert(p, vec![file(&format!("{p}/x"))]);
        }
        cache.invalidate(Some("a/b/c"));
        for p in ["", "a", "a/b", "a/b/c"] {
            assert!(!cache.contains(p), "{p} should be gone");
        }
        assert!(cache.contains("a/d"));

        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ls_from_cache() {
        let cache = DirCache::new();
        assert_eq!(cache.ls_from_cache("b/k"), CacheLookup::Miss);

        cache.insert("b", vec![file("b/k"), Entry::directory("b/d")]);
        match cache.ls_from_cache("b/k") {
            CacheLookup::Listing(found) => assert_eq!(found, vec![file("b/k")]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cache.ls_from_cache("b/missing"), CacheLookup::Absent);

        cache.insert("b/d", vec![file("b/d/x")]);
        assert_eq!(
            cache.ls_from_cache("s3://b/d/"),
            CacheLookup::Listing(vec![file("b/d/x")])
        );
    }

    #[test]
    fn test_lists() {
        let cache = DirCache::new();
        assert_eq!(cache.lists("b", "b/k"), None);
        cache.insert("b", vec![file("b/k")]);
        assert_eq!(cache.lists("b", "b/k"), Some(true));
        assert_eq!(cache.lists("b", "b/j"), Some(false));
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let cache = std::sync::Arc::new(DirCache::new());
        cache.insert("b", vec![file("b/k")]);
        let held = cache.clone();
        let joined = std::thread::spawn(move || {
            let _guard = held.listings.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.listings.is_poisoned());

        assert_eq!(cache.lists("b", "b/k"), Some(true));
        cache.invalidate(Some("b/k"));
        assert!(cache.is_empty());
    }
}
