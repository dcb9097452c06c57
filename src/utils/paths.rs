//! Path canonicalization for registry keys

use std::io;
use std::path::{Component, Path, PathBuf};

/// Absolute form of `path` with `.` and `..` resolved lexically
///
/// Relative paths are taken against the current directory. Symlinks are left
/// alone, so the result does not depend on what exists on disk.
pub fn canonical_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Registry key for `path`
pub fn canonical_key(path: &Path) -> io::Result<String> {
    Ok(canonical_path(path)?.to_string_lossy().into_owned())
}

/// Lexical normalization; `..` never climbs above the root
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// `owner/name` for a GitHub URL; other URLs pass through without a `.git` suffix
pub fn remote_path_from_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let path = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .or_else(|| trimmed.strip_prefix("ssh://git@github.com/"))
        .unwrap_or(trimmed);
    path.to_string()
}
