//! Path matching for ignore rules and unwatch requests.
//!
//! A [`Matcher`] describes one way of selecting paths; a [`MatcherSet`]
//! combines several and answers "does any of them match this path". Both
//! sides of every comparison are normalized to forward slashes with `.`/`..`
//! segments resolved, so a matcher compiled from `./a\b` matches a
//! candidate reported as `a/b`.

use std::sync::Arc;

use vg_core::PathStats;
use vg_core::paths::normalize_path;

use crate::error::WatchError;

/// A user-supplied predicate over a normalized path and optional stats.
pub type MatchPredicate = Arc<dyn Fn(&str, Option<&PathStats>) -> bool + Send + Sync>;

/// One way of selecting paths.
#[derive(Clone)]
pub enum Matcher {
    /// Matches exactly one normalized path.
    Path(String),

    /// Matches paths the regular expression matches.
    Regex(regex::Regex),

    /// Matches paths the predicate accepts. The predicate also receives
    /// the stats snapshot when the caller has one.
    Predicate(MatchPredicate),

    /// Matches a path and the subtree below it.
    Tree {
        /// The subtree root.
        path: String,
        /// When `false`, only the root and its direct children match.
        recursive: bool,
    },
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Tree { path, recursive } => f
                .debug_struct("Tree")
                .field("path", path)
                .field("recursive", recursive)
                .finish(),
        }
    }
}

impl Matcher {
    fn matches(&self, path: &str, stats: Option<&PathStats>) -> bool {
        match self {
            Self::Path(wanted) => path == wanted,
            Self::Regex(re) => re.is_match(path),
            Self::Predicate(pred) => pred(path, stats),
            Self::Tree { path: root, recursive } => {
                if path == root {
                    return true;
                }
                let Some(rest) = path
                    .strip_prefix(root.as_str())
                    .and_then(|r| r.strip_prefix('/'))
                else {
                    return false;
                };
                *recursive || !rest.contains('/')
            }
        }
    }
}

/// A compiled, non-empty collection of matchers.
#[derive(Debug, Clone)]
pub struct MatcherSet {
    matchers: Vec<Matcher>,
}

impl MatcherSet {
    /// Compiles a list of matchers, normalizing every stored path.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when the list is empty; an empty set
    /// has no sensible answer and always indicates a caller bug.
    pub fn compile(matchers: Vec<Matcher>) -> Result<Self, WatchError> {
        if matchers.is_empty() {
            return Err(WatchError::config("matcher list is empty"));
        }
        let matchers = matchers
            .into_iter()
            .map(|m| match m {
                Matcher::Path(p) => Matcher::Path(normalize_path(&p)),
                Matcher::Tree { path, recursive } => Matcher::Tree {
                    path: normalize_path(&path),
                    recursive,
                },
                other => other,
            })
            .collect();
        Ok(Self { matchers })
    }

    /// Returns `true` when any matcher matches the normalized `path`.
    #[must_use]
    pub fn matches(&self, path: &str, stats: Option<&PathStats>) -> bool {
        let normalized = normalize_path(path);
        self.matchers
            .iter()
            .any(|m| m.matches(&normalized, stats))
    }

    /// Number of matchers in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(matchers: Vec<Matcher>) -> MatcherSet {
        MatcherSet::compile(matchers).expect("non-empty")
    }

    #[test]
    fn test_empty_list_is_a_config_error() {
        let err = MatcherSet::compile(Vec::new()).expect_err("empty must fail");
        assert!(matches!(err, WatchError::Config { .. }));
    }

    #[test]
    fn test_literal_path_matches_normalized_forms() {
        let s = set(vec![Matcher::Path("./a\\b/../b/c.txt".into())]);
        assert!(s.matches("a/b/c.txt", None));
        assert!(s.matches("a\\b\\c.txt", None));
        assert!(!s.matches("a/b/d.txt", None));
    }

    #[test]
    fn test_regex_matcher() {
        let re = regex::Regex::new(r"\.log$").expect("valid regex");
        let s = set(vec![Matcher::Regex(re)]);
        assert!(s.matches("var/out.log", None));
        assert!(!s.matches("var/out.txt", None));
    }

    #[test]
    fn test_predicate_receives_stats() {
        let s = set(vec![Matcher::Predicate(Arc::new(|path, stats| {
            path.ends_with(".bin") && stats.is_some_and(|st| st.size > 100)
        }))]);
        let mut stats = PathStats::zeroed();
        stats.size = 500;
        assert!(s.matches("blob.bin", Some(&stats)));
        assert!(!s.matches("blob.bin", None));
        assert!(!s.matches("blob.txt", Some(&stats)));
    }

    #[test]
    fn test_tree_recursive() {
        let s = set(vec![Matcher::Tree {
            path: "node_modules".into(),
            recursive: true,
        }]);
        assert!(s.matches("node_modules", None));
        assert!(s.matches("node_modules/pkg", None));
        assert!(s.matches("node_modules/pkg/deep/file.js", None));
        assert!(!s.matches("node_modules_backup", None));
        assert!(!s.matches("src/node_modules.txt", None));
    }

    #[test]
    fn test_tree_non_recursive_stops_at_direct_children() {
        let s = set(vec![Matcher::Tree {
            path: "build".into(),
            recursive: false,
        }]);
        assert!(s.matches("build", None));
        assert!(s.matches("build/out.o", None));
        assert!(!s.matches("build/deep/out.o", None));
    }

    #[test]
    fn test_any_semantics() {
        let s = set(vec![
            Matcher::Path("a.txt".into()),
            Matcher::Path("b.txt".into()),
        ]);
        assert!(s.matches("a.txt", None));
        assert!(s.matches("b.txt", None));
        assert!(!s.matches("c.txt", None));
        assert_eq!(s.len(), 2);
        assert!(!s.is_empty());
    }
}
