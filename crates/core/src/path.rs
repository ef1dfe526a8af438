//! Path helpers for the tracked path tree
//!
//! Tracked paths are absolute, `/`-separated strings without trailing slashes.
//! The root is `/`.

use smallvec::SmallVec;
use thiserror::Error;

/// The root path
pub const ROOT: &str = "/";

/// Escape character used in every LIKE pattern built by [`escape_like`]
pub const LIKE_ESCAPE: char = '\\';

/// Path validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not absolute: {0:?}")]
    NotAbsolute(String),
    #[error("path contains a parent traversal: {0:?}")]
    ParentTraversal(String),
    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
}

/// Normalize an absolute path
///
/// - Collapses repeated `/`
/// - Drops `.` components and trailing `/`
/// - Rejects relative paths and `..`
pub fn normalize(path: &str) -> Result<String, PathError> {
    if !path.starts_with('/') {
        return Err(PathError::NotAbsolute(path.to_string()));
    }

    let mut out = String::with_capacity(path.len());
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(PathError::ParentTraversal(path.to_string())),
            name => {
                out.push('/');
                out.push_str(name);
            }
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Check that `name` is a single path component
pub fn validate_name(name: &str) -> Result<(), PathError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(PathError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Parent of a normalized path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a normalized path (empty for the root)
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Join a normalized directory path and a single component
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Proper ancestors of a normalized path, root first
///
/// `/a/b/c` yields `["/", "/a", "/a/b"]`.
pub fn ancestors(path: &str) -> SmallVec<[&str; 8]> {
    let mut out = SmallVec::new();
    if path == ROOT {
        return out;
    }
    out.push(ROOT);
    for (idx, _) in path.match_indices('/').skip(1) {
        out.push(&path[..idx]);
    }
    out
}

/// Escape LIKE metacharacters (`%`, `_` and the escape character itself)
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// LIKE pattern matching every strict descendant of `path`
///
/// Must be used with `ESCAPE '\'`.
pub fn descendants_pattern(path: &str) -> String {
    if path == ROOT {
        // `_` keeps the root itself out of the match
        "/_%".to_string()
    } else {
        format!("{}/%", escape_like(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("//").unwrap(), "/");
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("/a//./b").unwrap(), "/a/b");
        assert!(matches!(normalize("a/b"), Err(PathError::NotAbsolute(_))));
        assert!(matches!(normalize("/a/../b"), Err(PathError::ParentTraversal(_))));
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(file_name("/a/b/c"), "c");
        assert_eq!(file_name("/"), "");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_ancestors() {
        assert!(ancestors("/").is_empty());
        assert_eq!(ancestors("/a").as_slice(), &["/"]);
        assert_eq!(ancestors("/a/b/c").as_slice(), &["/", "/a", "/a/b"]);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("file.txt").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like("/a_b/100%"), "/a\\_b/100\\%");
        assert_eq!(escape_like("/back\\slash"), "/back\\\\slash");
        assert_eq!(descendants_pattern("/"), "/_%");
        assert_eq!(descendants_pattern("/a_b"), "/a\\_b/%");
    }
}
