//! Path normalization helpers.
//!
//! The watcher compares user-supplied paths, matcher patterns, and paths
//! reported by the OS against each other, so everything is funneled through
//! a single normalized form first: forward slashes only, doubled separators
//! collapsed, and `.`/`..` segments resolved lexically.
//!
//! A doubled slash at the very start of a path is preserved because
//! `//server/share/...` is a valid network path.

use camino::{Utf8Path, Utf8PathBuf};

/// Converts a path string to forward-slash form.
///
/// Backslashes become slashes and interior doubled slashes are collapsed.
/// A leading `//` is kept as-is.
///
/// # Examples
///
/// ```
/// use vg_core::paths::to_unix;
///
/// assert_eq!(to_unix(r"a\b\c"), "a/b/c");
/// assert_eq!(to_unix("a//b///c"), "a/b/c");
/// assert_eq!(to_unix("//server/share"), "//server/share");
/// ```
#[must_use]
pub fn to_unix(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let network = slashed.starts_with("//");

    let mut out = String::with_capacity(slashed.len());
    let mut prev_slash = false;
    for ch in slashed.chars() {
        if ch == '/' {
            if !prev_slash {
                out.push(ch);
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }

    if network {
        out.insert(0, '/');
    }
    out
}

/// Resolves `.` and `..` segments without touching the filesystem.
///
/// Mirrors the lexical normalization performed by the platform path module:
/// `..` pops a previous segment when one is available, leading `..` segments
/// of a relative path are kept, and an empty result becomes `.`.
#[must_use]
fn resolve_dots(path: &str) -> String {
    let absolute = path.starts_with('/');
    let network = path.starts_with("//");

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(&s) if s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        let prefix = if network { "//" } else { "/" };
        format!("{prefix}{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Normalizes a path to the canonical form used by matchers and tables.
///
/// # Examples
///
/// ```
/// use vg_core::paths::normalize_path;
///
/// assert_eq!(normalize_path(r"a\b\..\c"), "a/c");
/// assert_eq!(normalize_path("./x//y/"), "x/y");
/// assert_eq!(normalize_path("//storagepc/pool/movies"), "//storagepc/pool/movies");
/// ```
#[must_use]
pub fn normalize_path(path: &str) -> String {
    to_unix(&resolve_dots(&to_unix(path)))
}

/// Strips a leading `./` from a path, if present.
#[must_use]
pub fn strip_dot_prefix(path: &str) -> &str {
    path.strip_prefix("./")
        .or_else(|| path.strip_prefix(".\\"))
        .unwrap_or(path)
}

/// Returns `true` if a normalized path is absolute.
///
/// Covers both POSIX (`/...`) and Windows drive (`C:/...`) forms so that
/// normalized strings can be classified without reconstructing a
/// platform-specific path value.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}

/// Resolves a path against a base directory, normalizing the result.
///
/// Absolute paths are returned normalized; relative paths are joined onto
/// `cwd` first.
///
/// # Examples
///
/// ```
/// use vg_core::paths::absolute;
/// use camino::Utf8Path;
///
/// assert_eq!(absolute(Utf8Path::new("b"), Utf8Path::new("/a")), "/a/b");
/// assert_eq!(absolute(Utf8Path::new("/x/y"), Utf8Path::new("/a")), "/x/y");
/// ```
#[must_use]
pub fn absolute(path: &Utf8Path, cwd: &Utf8Path) -> Utf8PathBuf {
    let joined = if is_absolute(path.as_str()) {
        path.to_owned()
    } else {
        cwd.join(path)
    };
    Utf8PathBuf::from(normalize_path(joined.as_str()))
}

/// Computes the path of `child` relative to `base`, if `child` is equal to
/// or a descendant of `base`.
///
/// Both arguments are expected in normalized form. Returns `None` when
/// `child` lies outside `base`.
#[must_use]
pub fn relative_to<'a>(child: &'a str, base: &str) -> Option<&'a str> {
    if child == base {
        return Some("");
    }
    let trimmed = base.trim_end_matches('/');
    child
        .strip_prefix(trimmed)
        .and_then(|rest| rest.strip_prefix('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_unix_backslashes() {
        assert_eq!(to_unix(r"foo\bar\baz.txt"), "foo/bar/baz.txt");
    }

    #[test]
    fn test_to_unix_collapses_doubles() {
        assert_eq!(to_unix("foo//bar////baz"), "foo/bar/baz");
    }

    #[test]
    fn test_to_unix_preserves_network_prefix() {
        assert_eq!(to_unix("//storagepc/drivepool/movies"), "//storagepc/drivepool/movies");
        assert_eq!(to_unix(r"\\server\share"), "//server/share");
    }

    #[test]
    fn test_normalize_resolves_dots() {
        assert_eq!(normalize_path("a/./b/../c"), "a/c");
        assert_eq!(normalize_path("/a/b/../../c"), "/c");
        assert_eq!(normalize_path("../x"), "../x");
        assert_eq!(normalize_path("a/.."), ".");
    }

    #[test]
    fn test_normalize_dotdot_above_root() {
        assert_eq!(normalize_path("/../a"), "/a");
    }

    #[test]
    fn test_strip_dot_prefix() {
        assert_eq!(strip_dot_prefix("./a/b"), "a/b");
        assert_eq!(strip_dot_prefix("a/b"), "a/b");
        assert_eq!(strip_dot_prefix(".hidden"), ".hidden");
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("/a/b"));
        assert!(is_absolute("C:/windows"));
        assert!(!is_absolute("a/b"));
        assert!(!is_absolute("./a"));
    }

    #[test]
    fn test_absolute_joins_cwd() {
        let cwd = Utf8Path::new("/base");
        assert_eq!(absolute(Utf8Path::new("sub/file"), cwd), "/base/sub/file");
        assert_eq!(absolute(Utf8Path::new("/already"), cwd), "/already");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/a/b/c", "/a/b"), Some("c"));
        assert_eq!(relative_to("/a/b", "/a/b"), Some(""));
        assert_eq!(relative_to("/a/bc", "/a/b"), None);
        assert_eq!(relative_to("/x/y", "/a"), None);
    }
}
