//! Helpers for the relative, `/`-separated paths used by [`crate::Store`].

use crate::error::{Error, Result};

/// Rejects absolute paths and paths escaping the store root.
pub fn validate(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.split('/').any(|c| c == "..") {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Joins two path fragments with exactly one separator.
pub fn join(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Everything before the last separator, or `""` for top-level names.
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// The last path component.
pub fn file_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Splits the first `depth` segments of `width` characters off an id,
/// e.g. `pathify("abcdef", 2, 2) == "ab/cd/ef"`. Keeps directories small
/// when many ids share one parent.
pub fn pathify(id: &str, depth: usize, width: usize) -> String {
    let mut out = String::with_capacity(id.len() + depth);
    let mut rest = id;
    for _ in 0..depth {
        if rest.len() <= width || !rest.is_char_boundary(width) {
            break;
        }
        let (head, tail) = rest.split_at(width);
        out.push_str(head);
        out.push('/');
        rest = tail;
    }
    out.push_str(rest);
    out
}

/// Expresses `target` relative to the directory holding `link`, so that a
/// symlink written on disk stays valid when the store root moves.
pub fn relative_link_target(link: &str, target: &str) -> String {
    let depth = parent(link).split('/').filter(|c| !c.is_empty()).count();
    let mut out = "../".repeat(depth);
    out.push_str(target);
    out
}

/// Resolves a raw symlink target read from `link` back to a store path.
pub fn resolve_link_target(link: &str, raw: &str) -> Result<String> {
    let mut parts: Vec<&str> = parent(link).split('/').filter(|c| !c.is_empty()).collect();
    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::InvalidPath(raw.to_string()));
                }
            }
            c => parts.push(c),
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidPath(raw.to_string()));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_escapes() {
        assert!(validate("a/b").is_ok());
        assert!(validate("/a").is_err());
        assert!(validate("a/../b").is_err());
        assert!(validate("").is_err());
    }

    #[test]
    fn join_parent_file_name() {
        assert_eq!(join("a/", "/b"), "a/b");
        assert_eq!(join("", "b"), "b");
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("c"), "");
        assert_eq!(file_name("a/b/c"), "c");
        assert_eq!(file_name("c"), "c");
    }

    #[test]
    fn pathify_splits_prefix() {
        assert_eq!(pathify("abcdef", 2, 2), "ab/cd/ef");
        assert_eq!(pathify("abc", 4, 2), "ab/c");
        assert_eq!(pathify("ab", 1, 2), "ab");
    }

    #[test]
    fn link_targets_are_relative_to_the_link() {
        let link = "index.disk/unique.User.email/a@b.c";
        let target = "users/4711";
        let raw = relative_link_target(link, target);
        assert_eq!(raw, "../../users/4711");
        assert_eq!(resolve_link_target(link, &raw).unwrap(), target);
    }

    #[test]
    fn resolve_rejects_targets_above_root() {
        assert!(resolve_link_target("a/link", "../../x").is_err());
    }
}
