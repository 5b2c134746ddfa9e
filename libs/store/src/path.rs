//! Store path helpers.
//!
//! Paths are absolute, `/`-separated, with no trailing slash except the
//! root itself.

use crate::{StoreError, StoreResult};

/// The root path.
pub const ROOT: &str = "/";

/// Validates an absolute store path.
pub fn validate(path: &str) -> StoreResult<()> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Joins a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Returns the parent of a path, or `None` for the root.
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

/// Returns the last segment of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns every ancestor of `path`, shallowest first, excluding the root
/// and the path itself.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        out.push(p);
        current = parent(p);
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("/", "servers"), "/servers");
        assert_eq!(join("/servers", "host1"), "/servers/host1");
        assert_eq!(parent("/servers/host1"), Some("/servers"));
        assert_eq!(parent("/servers"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(basename("/servers/host1"), "host1");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").is_empty());
    }

    #[rstest]
    #[case("/", true)]
    #[case("/a/b", true)]
    #[case("/trace/00ff/app#0000000001,1.0,cell,pending,", true)]
    #[case("a/b", false)]
    #[case("/a/", false)]
    #[case("/a//b", false)]
    #[case("", false)]
    fn test_validate(#[case] path: &str, #[case] valid: bool) {
        assert_eq!(validate(path).is_ok(), valid);
    }
}
