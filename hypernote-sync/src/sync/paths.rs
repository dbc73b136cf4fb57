use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps a `/`-separated relative path under `root`, rejecting anything that
/// could escape it.
pub fn local_path_for(root: &Path, relative_path: &str) -> Result<PathBuf, PathError> {
    if relative_path.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for segment in relative_path.split('/') {
        if !is_valid_segment(segment) {
            return Err(PathError::UnsupportedComponent(segment.to_string()));
        }
        out.push(segment);
    }
    Ok(out)
}

pub fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Splits `a/b/c.md` into (`a/b`, `c.md`); top-level files get an empty parent.
pub fn split_parent(relative_path: &str) -> (&str, &str) {
    relative_path.rsplit_once('/').unwrap_or(("", relative_path))
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// A single path segment usable on both sides of the mirror.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains('\\')
        && !segment.contains('\0')
}
