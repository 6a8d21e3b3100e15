//! Lexical path helpers.
//!
//! Nothing here touches the filesystem: virtual (mocked) paths must normalize
//! the same way as real ones.

use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Normalize a path lexically, folding `.` and `..` components.
///
/// A `..` that would climb above the root of an absolute path is dropped.
/// For relative paths leading `..` components are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    let mut normalized = PathBuf::new();
    for component in out {
        normalized.push(component.as_os_str());
    }
    normalized
}

/// Resolve `path` against `base` and normalize the result.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Compute the path of `target` relative to the directory `from`.
///
/// Both paths are expected to be absolute and normalized.
pub fn relative(from: &Path, target: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let target: Vec<_> = target.components().collect();

    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &target[common..] {
        rel.push(component.as_os_str());
    }
    rel
}

/// Whether the path is written with a trailing separator (i.e. names a directory).
pub fn has_trailing_separator(path: &Path) -> bool {
    let s = path.as_os_str().to_string_lossy();
    s.ends_with(MAIN_SEPARATOR) || s.ends_with('/')
}

/// Return the path with exactly one trailing separator.
pub fn with_trailing_separator(path: &Path) -> PathBuf {
    if has_trailing_separator(path) {
        path.to_path_buf()
    } else {
        path.join("")
    }
}

/// Whether `path` escapes its base (`..` first component) when read as a relative path.
pub fn escapes(rel: &Path) -> bool {
    matches!(rel.components().next(), Some(Component::ParentDir))
}

/// Render a relative path as a URL path with forward slashes.
pub fn to_url_path(rel: &Path) -> String {
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("/{}", parts.join("/"))
}
