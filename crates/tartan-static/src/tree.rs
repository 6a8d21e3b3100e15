//! Context tree builder.
//!
//! Walks the source tree breadth-first and computes the default, current and
//! merged context of every path. A node is committed before any of its
//! children are dequeued, so children can always look up their parent's
//! default context.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tartan_resolve::paths::{escapes, normalize, relative, with_trailing_separator};
use tartan_resolve::{
    merge, ContextFile, EntryKind, MemoryStore, ModeSpec, ResolvedContext, Resolver,
    SourceType,
};

use crate::error::BuildError;
use crate::glob::glob_files;

/// Context file name for directories, without extension.
pub const CONTEXT_FILE: &str = "tartan.context";

/// Default context file name, without extension.
pub const DEFAULT_CONTEXT_FILE: &str = "tartan.context.default";

/// One resolved path of the source tree.
#[derive(Debug, Clone)]
pub struct ContextTreeNode {
    /// Normalized path; directories carry a trailing separator
    pub path: PathBuf,

    /// Context inherited by this node's children
    pub default_context: Arc<ResolvedContext>,

    /// Context loaded from this node's own context file
    pub current_context: Arc<ResolvedContext>,

    /// `current_context` merged over `default_context`
    pub merged_context: Arc<ResolvedContext>,

    pub source_type: SourceType,

    /// Parent directory node, `None` for the root
    pub parent: Option<PathBuf>,

    pub is_dir: bool,

    /// The node produces no output of its own
    pub skip: bool,
}

/// The flat result of a walk, in commit order.
#[derive(Debug, Default)]
pub struct ContextTree {
    nodes: Vec<ContextTreeNode>,
    index: HashMap<PathBuf, usize>,
    /// Parent path to child node indices, in commit order
    children: HashMap<PathBuf, Vec<usize>>,
}

impl ContextTree {
    fn commit(&mut self, node: ContextTreeNode) {
        match self.index.get(&node.path) {
            // mock re-expansion replaces the node wholesale
            Some(&i) => {
                if self.nodes[i].parent != node.parent {
                    if let Some(old) = self.nodes[i].parent.take() {
                        if let Some(siblings) = self.children.get_mut(&old) {
                            siblings.retain(|&child| child != i);
                        }
                    }
                    if let Some(parent) = &node.parent {
                        self.children.entry(parent.clone()).or_default().push(i);
                    }
                }
                self.nodes[i] = node;
            }
            None => {
                let i = self.nodes.len();
                self.index.insert(node.path.clone(), i);
                if let Some(parent) = &node.parent {
                    self.children.entry(parent.clone()).or_default().push(i);
                }
                self.nodes.push(node);
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&ContextTreeNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    /// The node without a parent.
    pub fn root(&self) -> Option<&ContextTreeNode> {
        self.nodes.iter().find(|node| node.parent.is_none())
    }

    /// Children of `path`, in enqueue order.
    pub fn children(&self, path: &Path) -> impl Iterator<Item = &ContextTreeNode> + '_ {
        self.children
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContextTreeNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct QueueItem {
    path: PathBuf,
    parent: Option<PathBuf>,
    source_type: SourceType,
}

/// Builds the [`ContextTree`] for a source directory.
pub struct TreeBuilder<'a> {
    resolver: &'a Resolver,
    root_dir: PathBuf,
    root_context: Arc<ResolvedContext>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(resolver: &'a Resolver, root_dir: &Path, root_context: Arc<ResolvedContext>) -> Self {
        Self {
            resolver,
            root_dir: with_trailing_separator(&normalize(root_dir)),
            root_context,
        }
    }

    /// Walk the whole tree.
    pub fn build(&self) -> Result<ContextTree, BuildError> {
        let mut tree = ContextTree::default();
        let mut queue = vec![QueueItem {
            path: self.root_dir.clone(),
            parent: None,
            source_type: SourceType::Page,
        }];
        let mut enqueued: HashSet<PathBuf> = HashSet::from([self.root_dir.clone()]);
        let mut mocked: HashSet<PathBuf> = HashSet::new();

        // the queue grows while it is walked
        let mut i = 0;
        while i < queue.len() {
            let item = queue[i].clone();
            i += 1;
            tracing::trace!("Resolving context for {}", item.path.display());

            let kind = self.resolver.fs().stat(&item.path).ok_or_else(|| {
                BuildError::filesystem(
                    &item.path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
                )
            })?;

            let mut push = |path: PathBuf, source_type: SourceType| {
                if enqueued.insert(path.clone()) {
                    queue.push(QueueItem {
                        path,
                        parent: Some(item.path.clone()),
                        source_type,
                    });
                }
            };

            if kind == EntryKind::File {
                let node = self.resolve_file(&item, &tree)?;
                tree.commit(node);
                continue;
            }

            let dir = with_trailing_separator(&item.path);
            let (default_context, current_context) = self.directory_contexts(&dir, &item, &tree)?;
            let merged_context = Arc::new(merge(&default_context, &current_context, &self.root_context));
            let mode = merged_context.mode()?;

            if let ModeSpec::Mock { generator } = &mode {
                if !mocked.insert(item.path.clone()) {
                    return Err(BuildError::MockExpansion(format!(
                        "{} is still in mock mode after expansion",
                        dir.display()
                    )));
                }
                let generated = generator
                    .generate()
                    .map_err(|e| BuildError::plugin(&dir, e))?;
                self.overlay_mock(&dir, generated)?;

                tree.commit(ContextTreeNode {
                    path: dir.clone(),
                    default_context,
                    current_context,
                    merged_context,
                    source_type: item.source_type,
                    parent: item.parent.clone(),
                    is_dir: true,
                    skip: true,
                });
                queue.push(item);
                continue;
            }

            let fs = self.resolver.fs();
            match &mode {
                ModeSpec::File {
                    page_pattern,
                    page_source,
                } => {
                    let page_source = page_source.map(|source| normalize(&dir.join(source)));
                    for page in glob_files(fs, &dir, page_pattern)? {
                        if Some(&page) != page_source.as_ref() {
                            push(page, SourceType::Page);
                        }
                    }
                }
                ModeSpec::Asset { page_pattern } => {
                    for asset in glob_files(fs, &dir, page_pattern)? {
                        push(asset, SourceType::Asset);
                    }
                }
                _ => {}
            }

            let entries = fs
                .read_dir(&dir)
                .map_err(|e| BuildError::filesystem(&dir, e))?;
            for entry in entries.iter().filter(|entry| entry.is_dir()) {
                push(with_trailing_separator(&dir.join(&entry.name)), SourceType::Page);
            }

            for pattern in merged_context.extra_assets.iter().flatten() {
                for asset in glob_files(fs, &dir, pattern)? {
                    push(asset, SourceType::Asset);
                }
            }

            let skip = match &mode {
                ModeSpec::Handoff { .. } => false,
                ModeSpec::Asset { .. } => true,
                _ => match merged_context.page_source.as_deref() {
                    Some(source) => !fs.is_file(&dir.join(source)),
                    None => true,
                },
            };

            tree.commit(ContextTreeNode {
                path: dir,
                default_context,
                current_context,
                merged_context,
                source_type: item.source_type,
                parent: item.parent,
                is_dir: true,
                skip,
            });
        }

        tracing::debug!("Resolved {} context tree nodes", tree.len());
        Ok(tree)
    }

    fn load_context(&self, path_without_ext: &Path) -> Result<Option<ResolvedContext>, BuildError> {
        let Some(file) = self
            .resolver
            .load_object_from_file::<ContextFile>(path_without_ext)?
        else {
            return Ok(None);
        };
        let context = self
            .resolver
            .initialize_context(&file, Some(path_without_ext))?;
        Ok(Some(context))
    }

    fn parent_default(&self, item: &QueueItem, tree: &ContextTree) -> Option<Arc<ResolvedContext>> {
        item.parent
            .as_ref()
            .and_then(|parent| tree.get(parent))
            .map(|node| Arc::clone(&node.default_context))
    }

    fn directory_contexts(
        &self,
        dir: &Path,
        item: &QueueItem,
        tree: &ContextTree,
    ) -> Result<(Arc<ResolvedContext>, Arc<ResolvedContext>), BuildError> {
        let parent_default = self.parent_default(item, tree);

        let default_context = match self.load_context(&dir.join(DEFAULT_CONTEXT_FILE))? {
            Some(loaded) => {
                let base = parent_default.as_deref().unwrap_or(&self.root_context);
                Arc::new(merge(base, &loaded, &self.root_context))
            }
            None => parent_default.unwrap_or_else(|| Arc::clone(&self.root_context)),
        };
        let current_context = self
            .load_context(&dir.join(CONTEXT_FILE))?
            .unwrap_or_default();

        Ok((default_context, Arc::new(current_context)))
    }

    fn resolve_file(&self, item: &QueueItem, tree: &ContextTree) -> Result<ContextTreeNode, BuildError> {
        let path = normalize(&item.path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path.parent().unwrap_or(Path::new("/"));

        let default_context = self
            .parent_default(item, tree)
            .unwrap_or_else(|| Arc::clone(&self.root_context));
        let current_context = Arc::new(
            self.load_context(&dir.join(format!("{}.context", name)))?
                .unwrap_or_default(),
        );
        let merged_context = Arc::new(merge(&default_context, &current_context, &self.root_context));

        Ok(ContextTreeNode {
            path,
            default_context,
            current_context,
            merged_context,
            source_type: item.source_type,
            parent: item.parent.clone(),
            is_dir: false,
            skip: false,
        })
    }

    fn overlay_mock(
        &self,
        dir: &Path,
        generated: tartan_resolve::MockDirectory,
    ) -> Result<(), BuildError> {
        let mut store = MemoryStore::new();
        store.insert_dir(dir);

        for (name, contents) in generated {
            if Path::new(&name).is_absolute() {
                return Err(BuildError::MockExpansion(format!(
                    "mock generator for {} produced absolute path {}",
                    dir.display(),
                    name
                )));
            }
            let target = normalize(&dir.join(&name));
            if escapes(&relative(&normalize(dir), &target)) {
                return Err(BuildError::MockExpansion(format!(
                    "mock generator for {} produced path {} outside the directory",
                    dir.display(),
                    name
                )));
            }
            if name.ends_with('/') {
                store.insert_dir(&target);
            } else {
                store.insert_file(&target, contents);
            }
        }

        tracing::debug!(
            "Expanded mock directory {} ({} files)",
            dir.display(),
            store.file_count()
        );
        self.resolver.fs().push_overlay(Arc::new(store));
        Ok(())
    }
}
