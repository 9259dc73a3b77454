//! Fast hash map and hash set type aliases.
//!
//! Type aliases for [`FxHashMap`] and [`FxHashSet`] from the `rustc-hash`
//! crate. The Fx hash algorithm is roughly 2x faster than the standard
//! library's default hasher for the string keys this workspace indexes on
//! (paths and basenames), and denial-of-service resistance is not needed
//! for purely internal tables.

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// The hasher used by [`FxHashMap`] and [`FxHashSet`].
pub type FxBuildHasher = rustc_hash::FxBuildHasher;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_hash_map_basic() {
        let mut map: FxHashMap<String, u32> = FxHashMap::default();
        map.insert("a".to_owned(), 1);
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn test_fx_hash_set_basic() {
        let mut set: FxHashSet<&str> = FxHashSet::default();
        set.insert("x");
        assert!(set.contains("x"));
        assert!(!set.contains("y"));
    }
}
