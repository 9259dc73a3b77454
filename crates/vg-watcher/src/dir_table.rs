//! Authoritative map of watched directories and their known children.
//!
//! Every watched directory has an entry holding the child names discovered
//! so far. Event handling diffs fresh directory reads against this table to
//! decide what appeared and what vanished, and removal cascades through it
//! so a recursive delete drains every level.

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;

use vg_core::{FxHashMap, FxHashSet};

/// Shared table of directory entries.
#[derive(Debug, Default)]
pub struct DirTable {
    dirs: Mutex<FxHashMap<Utf8PathBuf, FxHashSet<String>>>,
}

impl DirTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures an entry exists for `dir`.
    pub fn ensure(&self, dir: &Utf8Path) {
        self.dirs.lock().entry(dir.to_owned()).or_default();
    }

    /// Returns `true` when `dir` has an entry (is tracked as a directory).
    #[must_use]
    pub fn contains(&self, dir: &Utf8Path) -> bool {
        self.dirs.lock().contains_key(dir)
    }

    /// Records `name` as a child of `dir`, creating the entry if needed.
    ///
    /// `.` and `..` are never stored.
    pub fn add_child(&self, dir: &Utf8Path, name: &str) {
        if name.is_empty() || name == "." || name == ".." {
            return;
        }
        self.dirs
            .lock()
            .entry(dir.to_owned())
            .or_default()
            .insert(name.to_owned());
    }

    /// Returns `true` when `name` is a known child of `dir`.
    #[must_use]
    pub fn has_child(&self, dir: &Utf8Path, name: &str) -> bool {
        self.dirs
            .lock()
            .get(dir)
            .is_some_and(|children| children.contains(name))
    }

    /// The known children of `dir`, sorted.
    #[must_use]
    pub fn children(&self, dir: &Utf8Path) -> Vec<String> {
        let mut names: Vec<String> = self
            .dirs
            .lock()
            .get(dir)
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Evicts the entry for `dir` entirely.
    pub fn remove(&self, dir: &Utf8Path) {
        self.dirs.lock().remove(dir);
    }

    /// Forgets `name` under `dir`. When that leaves the entry empty the
    /// directory is re-stat'd; if it is gone from disk the entry itself is
    /// evicted and `true` is returned so the caller can cascade the
    /// removal of `dir` one level up.
    pub async fn remove_child(&self, dir: &Utf8Path, name: &str) -> bool {
        let now_empty = {
            let mut dirs = self.dirs.lock();
            let Some(children) = dirs.get_mut(dir) else {
                return false;
            };
            children.remove(name);
            children.is_empty()
        };

        if !now_empty {
            return false;
        }

        match tokio::fs::metadata(dir).await {
            Ok(_) => false,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.dirs.lock().remove(dir);
                true
            }
            Err(_) => false,
        }
    }

    /// Forgets `name` under `dir` without consulting the disk. Used when a
    /// subtree is unwatched rather than deleted.
    pub fn forget_child(&self, dir: &Utf8Path, name: &str) {
        if let Some(children) = self.dirs.lock().get_mut(dir) {
            children.remove(name);
        }
    }

    /// Drops every entry. Used on close.
    pub fn dispose_all(&self) {
        self.dirs.lock().clear();
    }

    /// A sorted snapshot of every tracked directory and its children.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Utf8PathBuf, Vec<String>)> {
        let mut out: Vec<(Utf8PathBuf, Vec<String>)> = self
            .dirs
            .lock()
            .iter()
            .map(|(dir, children)| {
                let mut names: Vec<String> = children.iter().cloned().collect();
                names.sort_unstable();
                (dir.clone(), names)
            })
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query_children() {
        let table = DirTable::new();
        let dir = Utf8Path::new("/watch/src");

        table.add_child(dir, "main.rs");
        table.add_child(dir, "lib.rs");
        assert!(table.contains(dir));
        assert!(table.has_child(dir, "main.rs"));
        assert!(!table.has_child(dir, "missing.rs"));
        assert_eq!(table.children(dir), vec!["lib.rs", "main.rs"]);
    }

    #[test]
    fn test_dot_entries_are_never_stored() {
        let table = DirTable::new();
        let dir = Utf8Path::new("/watch");

        table.add_child(dir, ".");
        table.add_child(dir, "..");
        table.add_child(dir, "");
        assert!(table.children(dir).is_empty());
    }

    #[tokio::test]
    async fn test_remove_child_keeps_existing_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf-8");

        let table = DirTable::new();
        table.add_child(&dir, "only.txt");

        // Directory still exists on disk, so no cascade even though empty.
        assert!(!table.remove_child(&dir, "only.txt").await);
        assert!(table.contains(&dir));
    }

    #[tokio::test]
    async fn test_remove_child_cascades_for_vanished_dir() {
        let table = DirTable::new();
        let dir = Utf8Path::new("/definitely/not/on/disk");
        table.add_child(dir, "a");
        table.add_child(dir, "b");

        assert!(!table.remove_child(dir, "a").await);
        assert!(
            table.remove_child(dir, "b").await,
            "emptied entry for a vanished directory must cascade"
        );
        assert!(!table.contains(dir));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let table = DirTable::new();
        table.add_child(Utf8Path::new("/b"), "z");
        table.add_child(Utf8Path::new("/b"), "a");
        table.add_child(Utf8Path::new("/a"), "m");

        let snap = table.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, Utf8PathBuf::from("/a"));
        assert_eq!(snap[1].1, vec!["a", "z"]);
    }

    #[test]
    fn test_dispose_all() {
        let table = DirTable::new();
        table.add_child(Utf8Path::new("/a"), "x");
        table.dispose_all();
        assert!(table.snapshot().is_empty());
    }
}
