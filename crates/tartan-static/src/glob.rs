//! Glob expansion over the layered filesystem.
//!
//! Patterns are matched one path segment at a time, so `*` never crosses a
//! separator and `**` behaves like `*`. Only files are returned.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobMatcher};
use tartan_resolve::{LayeredFs, OBJECT_EXTENSIONS};

use crate::error::BuildError;
use crate::tree::{CONTEXT_FILE, DEFAULT_CONTEXT_FILE};

/// Whether a file name is a context file, which never becomes a page or asset.
///
/// Context files are `tartan.context.<ext>`, `tartan.context.default.<ext>`
/// and `<name>.context.<ext>`, with `<ext>` one of [`OBJECT_EXTENSIONS`].
pub fn is_context_file(name: &str) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if !OBJECT_EXTENSIONS.contains(&ext) {
        return false;
    }
    stem == CONTEXT_FILE
        || stem == DEFAULT_CONTEXT_FILE
        || stem
            .strip_suffix(".context")
            .is_some_and(|target| !target.is_empty())
}

fn segment_matcher(segment: &str) -> Result<GlobMatcher, BuildError> {
    GlobBuilder::new(segment)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| BuildError::Config(format!("invalid glob \"{}\": {}", segment, e)))
}

/// Compile a glob matched against `/`-separated relative paths.
pub fn path_matcher(pattern: &str) -> Result<GlobMatcher, BuildError> {
    let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob: Glob| glob.compile_matcher())
        .map_err(|e| BuildError::Config(format!("invalid glob \"{}\": {}", pattern, e)))
}

/// Every file under `dir` matching `pattern`, context files excluded.
pub fn glob_files(fs: &LayeredFs, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, BuildError> {
    let segments: Vec<&str> = pattern
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let mut matches = Vec::new();
    if !segments.is_empty() {
        expand(fs, dir, &segments, &mut matches)?;
    }
    Ok(matches)
}

fn expand(
    fs: &LayeredFs,
    dir: &Path,
    segments: &[&str],
    matches: &mut Vec<PathBuf>,
) -> Result<(), BuildError> {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    let matcher = segment_matcher(segment)?;
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(BuildError::filesystem(dir, e)),
    };

    for entry in entries {
        if !matcher.is_match(&entry.name) {
            continue;
        }
        let path = dir.join(&entry.name);
        if rest.is_empty() {
            if entry.is_file() && !is_context_file(&entry.name) {
                matches.push(path);
            }
        } else if entry.is_dir() {
            expand(fs, &path, rest, matches)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn matches_files_in_directory() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("a.md"), "").unwrap();
        fs::write(root.join("b.md"), "").unwrap();
        fs::write(root.join("c.txt"), "").unwrap();
        fs::create_dir(root.join("dir.md")).unwrap();

        let found = glob_files(&LayeredFs::new(), root, "*.md").unwrap();
        assert_eq!(found, vec![root.join("a.md"), root.join("b.md")]);
    }

    #[test]
    fn descends_one_segment_at_a_time() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("posts/deep")).unwrap();
        fs::write(root.join("posts/one.md"), "").unwrap();
        fs::write(root.join("posts/deep/two.md"), "").unwrap();

        let found = glob_files(&LayeredFs::new(), root, "./posts/*.md").unwrap();
        assert_eq!(found, vec![root.join("posts/one.md")]);

        let star_star = glob_files(&LayeredFs::new(), root, "**/*.md").unwrap();
        assert_eq!(star_star, vec![root.join("posts/one.md")]);
    }

    #[test]
    fn skips_context_files() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("tartan.context.json"), "{}").unwrap();
        fs::write(root.join("page.md.context.json"), "{}").unwrap();
        fs::write(root.join("page.md"), "").unwrap();

        let found = glob_files(&LayeredFs::new(), root, "*").unwrap();
        assert_eq!(found, vec![root.join("page.md")]);
    }

    #[test]
    fn recognizes_context_file_names() {
        assert!(is_context_file("tartan.context.json"));
        assert!(is_context_file("tartan.context.default.toml"));
        assert!(is_context_file("post.md.context.mjs"));
        assert!(is_context_file("gallery.context.js"));

        assert!(!is_context_file("notes.context.draft.md"));
        assert!(!is_context_file("tartan.context.md"));
        assert!(!is_context_file("photo.context.png"));
        assert!(!is_context_file(".context.json"));
        assert!(!is_context_file("context.json"));
    }

    #[test]
    fn keeps_files_that_only_mention_context() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::write(root.join("notes.context.draft.md"), "").unwrap();
        fs::write(root.join("notes.md.context.json"), "{}").unwrap();

        let found = glob_files(&LayeredFs::new(), root, "*").unwrap();
        assert_eq!(found, vec![root.join("notes.context.draft.md")]);
    }

    #[test]
    fn path_matcher_respects_separators() {
        let matcher = path_matcher("styles/*.css").unwrap();
        assert!(matcher.is_match("styles/site.css"));
        assert!(!matcher.is_match("styles/vendor/x.css"));

        let deep = path_matcher("**/*.css").unwrap();
        assert!(deep.is_match("styles/vendor/x.css"));
    }
}
