//! Layered filesystem.
//!
//! A stack of backing stores consulted newest-first. The base store is the
//! real disk; mock-mode directories push in-memory overlays on top of it.
//! Every read made by the build (context files, page sources, assets,
//! manifests) goes through this stack so virtual files are indistinguishable
//! from real ones. Writes always go to disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::paths::normalize;

/// Kind of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name (no directory part)
    pub name: String,
    /// Entry kind
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A read-only backing store.
pub trait FsStore: Send + Sync + fmt::Debug {
    /// Kind of the entry at `path`, if the store has one.
    fn stat(&self, path: &Path) -> Option<EntryKind>;

    /// Read a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// List a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// The real filesystem.
#[derive(Debug, Default)]
pub struct DiskStore;

impl FsStore for DiskStore {
    fn stat(&self, path: &Path) -> Option<EntryKind> {
        let meta = fs::metadata(path).ok()?;
        Some(if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            // Follow symlinks, like the rest of the build does
            let kind = match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => EntryKind::Directory,
                Ok(_) => EntryKind::File,
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// An in-memory store holding absolute, normalized paths.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, creating all of its ancestor directories.
    pub fn insert_file(&mut self, path: &Path, contents: impl Into<Vec<u8>>) {
        let path = normalize(path);
        if let Some(parent) = path.parent() {
            self.insert_dir(parent);
        }
        self.files.insert(path, contents.into());
    }

    /// Add an (empty) directory and its ancestors.
    pub fn insert_dir(&mut self, path: &Path) {
        let mut current = Some(normalize(path));
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || !self.dirs.insert(dir.clone()) {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl FsStore for MemoryStore {
    fn stat(&self, path: &Path) -> Option<EntryKind> {
        let path = normalize(path);
        if self.files.contains_key(&path) {
            Some(EntryKind::File)
        } else if self.dirs.contains(&path) {
            Some(EntryKind::Directory)
        } else {
            None
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no in-memory file at {}", path.display()),
            )
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        if !self.dirs.contains(&path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no in-memory directory at {}", path.display()),
            ));
        }

        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        let children = self
            .dirs
            .iter()
            .map(|d| (d, EntryKind::Directory))
            .chain(self.files.keys().map(|f| (f, EntryKind::File)));
        for (child, kind) in children {
            if child.parent() == Some(path.as_path()) {
                if let Some(name) = child.file_name() {
                    entries.insert(name.to_string_lossy().into_owned(), kind);
                }
            }
        }

        Ok(entries
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }
}

/// The ordered store stack. Clones share the same stack.
#[derive(Debug, Clone)]
pub struct LayeredFs {
    stores: Arc<RwLock<Vec<Arc<dyn FsStore>>>>,
}

impl Default for LayeredFs {
    fn default() -> Self {
        Self::new()
    }
}

impl LayeredFs {
    /// A stack holding only the real disk.
    pub fn new() -> Self {
        Self::with_base(Arc::new(DiskStore))
    }

    /// A stack holding only `base`.
    pub fn with_base(base: Arc<dyn FsStore>) -> Self {
        Self {
            stores: Arc::new(RwLock::new(vec![base])),
        }
    }

    /// Push an overlay that takes precedence over every existing store.
    pub fn push_overlay(&self, store: Arc<dyn FsStore>) {
        self.stores.write().push(store);
    }

    /// Drop every overlay, leaving only the real disk.
    pub fn reset(&self) {
        let mut stores = self.stores.write();
        stores.clear();
        stores.push(Arc::new(DiskStore));
    }

    /// Number of stores on the stack, base included.
    pub fn depth(&self) -> usize {
        self.stores.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn FsStore>> {
        self.stores.read().iter().rev().cloned().collect()
    }

    pub fn stat(&self, path: &Path) -> Option<EntryKind> {
        self.snapshot().iter().find_map(|store| store.stat(path))
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_some()
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        self.stat(path) == Some(EntryKind::Directory)
    }

    pub fn is_file(&self, path: &Path) -> bool {
        self.stat(path) == Some(EntryKind::File)
    }

    /// Read from the newest store that has the file.
    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut last_err = None;
        for store in self.snapshot() {
            if store.stat(path) != Some(EntryKind::File) {
                continue;
            }
            match store.read(path) {
                Ok(contents) => return Ok(contents),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        }))
    }

    pub fn read_to_string(&self, path: &Path) -> io::Result<String> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Union of the directory listings of every store that has the directory.
    /// Newer stores win on name clashes.
    pub fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut merged: BTreeMap<String, EntryKind> = BTreeMap::new();
        let mut found = false;

        for store in self.snapshot().iter().rev() {
            if store.stat(path) != Some(EntryKind::Directory) {
                continue;
            }
            found = true;
            for entry in store.read_dir(path)? {
                merged.insert(entry.name, entry.kind);
            }
        }

        if !found {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", path.display()),
            ));
        }

        Ok(merged
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn overlays_take_precedence() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "disk").unwrap();

        let layered = LayeredFs::new();
        let mut overlay = MemoryStore::new();
        overlay.insert_file(&temp.path().join("a.txt"), "memory");
        overlay.insert_file(&temp.path().join("b.txt"), "only in memory");
        layered.push_overlay(Arc::new(overlay));

        assert_eq!(
            layered.read_to_string(&temp.path().join("a.txt")).unwrap(),
            "memory"
        );
        assert!(layered.is_file(&temp.path().join("b.txt")));

        let names: Vec<String> = layered
            .read_dir(temp.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn reset_drops_overlays() {
        let temp = tempdir().unwrap();
        let layered = LayeredFs::new();
        let mut overlay = MemoryStore::new();
        overlay.insert_file(&temp.path().join("ghost.txt"), "boo");
        layered.push_overlay(Arc::new(overlay));
        assert_eq!(layered.depth(), 2);

        layered.reset();

        assert_eq!(layered.depth(), 1);
        assert!(!layered.exists(&temp.path().join("ghost.txt")));
    }

    #[test]
    fn memory_store_lists_nested_entries() {
        let mut store = MemoryStore::new();
        store.insert_file(Path::new("/virtual/docs/index.html"), "<p>hi</p>");
        store.insert_dir(Path::new("/virtual/empty"));

        let entries = store.read_dir(Path::new("/virtual")).unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "docs".to_string(),
                    kind: EntryKind::Directory
                },
                DirEntry {
                    name: "empty".to_string(),
                    kind: EntryKind::Directory
                },
            ]
        );
        assert_eq!(store.stat(Path::new("/virtual/docs/")), Some(EntryKind::Directory));
    }

    #[test]
    fn missing_files_are_not_found() {
        let temp = tempdir().unwrap();
        let layered = LayeredFs::new();
        let err = layered.read(&temp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
