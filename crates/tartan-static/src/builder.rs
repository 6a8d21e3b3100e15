//! Build orchestration.
//!
//! A [`Project`] owns the resolver, asset handler and bundler for one source
//! tree. [`Project::build`] resolves the context tree, then processes it
//! post-order so every page sees the metadata of all its descendants.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tartan_resolve::paths::relative;
use tartan_resolve::{
    AssetProcessor, Module, ModeSpec, Resolver, SourceMeta, SourceType, SubSourceMeta,
};

use crate::assets::AssetHandler;
use crate::bundle::{Bundler, IifeBundler};
use crate::config::ProjectConfig;
use crate::error::BuildError;
use crate::html::HtmlProcessor;
use crate::page::{OutputClaims, PageInput, PageProcessor};
use crate::tree::{ContextTree, ContextTreeNode, TreeBuilder};

/// Result of a build.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// Number of pages written, handoffs included
    pub pages: usize,

    /// Number of assets written
    pub assets: usize,

    /// Build duration in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,

    /// Metadata of the root page and everything below it
    #[serde(skip)]
    pub meta: Vec<SourceMeta>,
}

/// A configured source tree ready to build.
pub struct Project {
    config: ProjectConfig,
    resolver: Resolver,
    assets: AssetHandler,
    bundler: Box<dyn Bundler>,
}

impl Project {
    /// Create a project. Relative directories in `config` are resolved
    /// against `working_dir`.
    pub fn new(config: ProjectConfig, working_dir: &Path) -> Self {
        let config = config.normalized(working_dir);
        let resolver = Resolver::new(config.resolver_options(working_dir));
        Self {
            config,
            resolver,
            assets: AssetHandler::new(),
            bundler: Box::new(IifeBundler::new()),
        }
    }

    /// Replace the component bundler.
    pub fn with_bundler(mut self, bundler: impl Bundler + 'static) -> Self {
        self.bundler = Box::new(bundler);
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    /// Make a plugin or data object importable under `specifier`.
    pub fn register_module(&mut self, specifier: &str, module: impl Into<Module>) {
        self.resolver.register_module(specifier, module);
    }

    /// Register an asset processor for `glob`, taking precedence over every
    /// earlier registration.
    pub fn register_asset_processor(
        &mut self,
        glob: &str,
        processor: Arc<dyn AssetProcessor>,
    ) -> Result<(), BuildError> {
        self.assets.register(glob, processor)
    }

    /// Load design library manifests and the configured asset processors.
    /// Call once, after registering modules.
    pub async fn init(&mut self) -> Result<(), BuildError> {
        self.resolver.init()?;

        for (glob, specifier) in &self.config.extra_asset_processors {
            let processor = self.resolver.import_asset_processor(specifier, None)?;
            self.assets.register(glob, processor)?;
        }
        Ok(())
    }

    /// Build the whole tree into the output directory.
    pub async fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        // mock overlays from an earlier build must not leak into this one
        self.resolver.fs().reset();

        let root_context = Arc::new(
            self.resolver
                .initialize_context(&self.config.root_context_file(), None)?,
        );
        let tree = TreeBuilder::new(&self.resolver, &self.config.root_dir, root_context).build()?;
        let root = tree.root().ok_or_else(|| {
            BuildError::Config(format!(
                "nothing to build in {}",
                self.config.root_dir.display()
            ))
        })?;

        fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| BuildError::filesystem(&self.config.output_dir, e))?;

        let html = HtmlProcessor::new(
            &self.resolver,
            self.bundler.as_ref(),
            &self.config.root_dir,
            &self.config.output_dir,
        );
        let mut run = BuildRun {
            project: self,
            tree: &tree,
            pages: PageProcessor::new(html, self.resolver.fs()),
            claims: OutputClaims::default(),
            page_count: 0,
            asset_count: 0,
        };
        let emitted = run.process(root, 0)?;

        let result = BuildResult {
            pages: run.page_count,
            assets: run.asset_count,
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.config.output_dir.clone(),
            meta: emitted.into_iter().map(|(meta, _)| meta).collect(),
        };
        tracing::info!(
            "Built {} pages and {} assets into {} in {}ms",
            result.pages,
            result.assets,
            result.output_dir.display(),
            result.duration_ms
        );
        Ok(result)
    }

    /// Output directory mirroring `dir` below the root directory.
    fn mirror(&self, dir: &Path) -> PathBuf {
        let rel = relative(&self.config.root_dir, dir);
        if rel.as_os_str().is_empty() {
            self.config.output_dir.clone()
        } else {
            self.config.output_dir.join(rel)
        }
    }
}

/// State of one build pass.
struct BuildRun<'a> {
    project: &'a Project,
    tree: &'a ContextTree,
    pages: PageProcessor<'a>,
    claims: OutputClaims,
    page_count: usize,
    asset_count: usize,
}

impl BuildRun<'_> {
    /// Process `node` after all its descendants. Returns the metadata the
    /// node and its descendants emitted, with the depth of each.
    fn process(
        &mut self,
        node: &ContextTreeNode,
        depth: usize,
    ) -> Result<Vec<(SourceMeta, usize)>, BuildError> {
        if node.is_dir {
            if let ModeSpec::Handoff { handler } = node.merged_context.mode()? {
                let output_dir = self.project.mirror(&node.path);
                self.claims.claim(&output_dir)?;
                fs::create_dir_all(&output_dir)
                    .map_err(|e| BuildError::filesystem(&output_dir, e))?;
                handler
                    .handoff(&output_dir)
                    .map_err(|e| BuildError::plugin(&node.path, e))?;
                tracing::debug!("Handed off {}", output_dir.display());

                self.page_count += 1;
                let meta = SourceMeta {
                    source_type: SourceType::Page,
                    source_path: node.path.clone(),
                    output_path: output_dir,
                    context: Arc::clone(&node.merged_context),
                    extra: None,
                };
                return Ok(vec![(meta, depth)]);
            }
        }

        let mut descendants = Vec::new();
        let tree = self.tree;
        for child in tree.children(&node.path) {
            descendants.extend(self.process(child, depth + 1)?);
        }
        if node.skip {
            return Ok(descendants);
        }

        let own = match node.source_type {
            SourceType::Page => self.page(node, depth, &descendants)?,
            SourceType::Asset => self.asset(node)?,
        };
        let mut emitted = Vec::with_capacity(descendants.len() + 1);
        emitted.push((own, depth));
        emitted.extend(descendants);
        Ok(emitted)
    }

    fn page(
        &mut self,
        node: &ContextTreeNode,
        depth: usize,
        descendants: &[(SourceMeta, usize)],
    ) -> Result<SourceMeta, BuildError> {
        let subpage_meta: Vec<SubSourceMeta> = descendants
            .iter()
            .map(|(meta, meta_depth)| SubSourceMeta {
                meta: meta.clone(),
                distance: meta_depth - depth,
                depth: *meta_depth,
            })
            .collect();

        let (source_path, output_dir) = if node.is_dir {
            let page_source = node.merged_context.page_source.as_deref().unwrap_or_default();
            (node.path.join(page_source), self.project.mirror(&node.path))
        } else {
            let parent = node.path.parent().unwrap_or(Path::new("/"));
            let stem = node.path.file_stem().unwrap_or_default();
            (node.path.clone(), self.project.mirror(parent).join(stem))
        };

        let meta = self.pages.process(
            PageInput {
                source_path: &source_path,
                context: &node.merged_context,
                output_dir: &output_dir,
                subpage_meta: &subpage_meta,
                depth,
            },
            &mut self.claims,
        )?;
        self.page_count += 1;
        Ok(meta)
    }

    fn asset(&mut self, node: &ContextTreeNode) -> Result<SourceMeta, BuildError> {
        let parent = node.path.parent().unwrap_or(Path::new("/"));
        let output_dir = self.project.mirror(parent);
        let filename = self.project.assets.process(
            self.project.resolver.fs(),
            &self.project.config.root_dir,
            &node.path,
            &output_dir,
        )?;
        tracing::debug!("Wrote {}", output_dir.join(&filename).display());
        self.asset_count += 1;

        Ok(SourceMeta {
            source_type: SourceType::Asset,
            source_path: node.path.clone(),
            output_path: output_dir.join(filename),
            context: Arc::clone(&node.merged_context),
            extra: None,
        })
    }
}
