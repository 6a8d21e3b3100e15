//! The resolver.
//!
//! Aggregates custom element and template manifests from installed packages,
//! resolves prefixed paths, and loads the modules context files refer to.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::context::{ContextFile, ResolvedContext};
use crate::error::ResolveError;
use crate::fs::LayeredFs;
use crate::manifest::{
    read_json, CustomElementsManifest, PackageDefinition, PackageLock, TemplateManifest, LOCKFILE,
    TEMPLATE_SCHEMA_VERSION,
};
use crate::module::{AssetProcessor, HandoffHandler, MockGenerator, Module, SourceProcessor};
use crate::paths::{absolutize, has_trailing_separator, normalize, with_trailing_separator};
use crate::template::Template;

/// Extensions tried by [`Resolver::load_object_from_file`], highest priority first.
pub const OBJECT_EXTENSIONS: &[&str] = &["js", "mjs", "toml", "json"];

/// Resolver settings, taken from the project config.
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Directory relative paths are resolved against
    pub working_dir: PathBuf,

    /// Literal path prefix to replacement
    pub path_prefixes: BTreeMap<String, String>,

    /// Packages to aggregate; empty means every installed package
    pub design_libraries: Vec<String>,
}

/// Resolves tags, templates, paths and modules.
pub struct Resolver {
    working_dir: PathBuf,
    design_libraries: Vec<String>,
    /// Normalized (prefix, replacement) pairs, longest prefix first
    prefixes: Vec<(String, String)>,
    fs: LayeredFs,
    modules: HashMap<String, Module>,
    component_map: HashMap<String, String>,
    template_map: HashMap<String, Arc<Template>>,
}

fn with_trailing_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{}/", s)
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

impl Resolver {
    /// Create a resolver reading from the real disk.
    pub fn new(options: ResolverOptions) -> Self {
        Self::with_fs(options, LayeredFs::new())
    }

    /// Create a resolver reading through `fs`.
    pub fn with_fs(options: ResolverOptions, fs: LayeredFs) -> Self {
        let mut prefixes: Vec<(String, String)> = options
            .path_prefixes
            .iter()
            .map(|(prefix, target)| (with_trailing_slash(prefix), with_trailing_slash(target)))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            working_dir: normalize(&options.working_dir),
            design_libraries: options.design_libraries,
            prefixes,
            fs,
            modules: HashMap::new(),
            component_map: HashMap::new(),
            template_map: HashMap::new(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The layered filesystem every build read goes through.
    pub fn fs(&self) -> &LayeredFs {
        &self.fs
    }

    /// Register a module under a specifier.
    ///
    /// Path-like specifiers (`./x`, `../x`, `/x`) are stored as absolute
    /// paths against the working directory; anything else is kept verbatim.
    pub fn register_module(&mut self, specifier: &str, module: impl Into<Module>) {
        let key = if is_path_like(specifier) {
            absolutize(&self.working_dir, Path::new(specifier))
                .to_string_lossy()
                .into_owned()
        } else {
            specifier.to_string()
        };
        let module = module.into();
        tracing::debug!("Registered {} as {}", module.kind(), key);
        self.modules.insert(key, module);
    }

    /// Register a template under a name, as a template manifest would.
    pub fn register_template(&mut self, template: Template) {
        self.template_map
            .insert(template.name().to_string(), Arc::new(template));
    }

    /// Aggregate manifests from every package listed in the nearest lockfile.
    pub fn init(&mut self) -> Result<(), ResolveError> {
        let lockfile = self.find_up(LOCKFILE)?;
        let lock_dir = lockfile
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());
        let lock: PackageLock = read_json(&self.fs, &lockfile)?;

        for package_path in lock.packages.keys() {
            if !self.wants_package(package_path) {
                continue;
            }
            let package_dir = normalize(&lock_dir.join(package_path));
            let definition_path = package_dir.join("package.json");
            if !self.fs.is_file(&definition_path) {
                continue;
            }
            let definition: PackageDefinition = read_json(&self.fs, &definition_path)?;

            if let Some(manifest) = &definition.custom_elements {
                self.load_component_manifest(&normalize(&package_dir.join(manifest)))?;
            }
            if let Some(manifest) = &definition.tartan_template_manifest {
                self.load_template_manifest(&normalize(&package_dir.join(manifest)))?;
            }
        }

        tracing::info!(
            "Loaded {} tag mappings and {} templates from {}",
            self.component_map.len(),
            self.template_map.len(),
            lockfile.display()
        );
        Ok(())
    }

    fn wants_package(&self, package_path: &str) -> bool {
        if self.design_libraries.is_empty() {
            return true;
        }
        let name = package_path
            .rsplit("node_modules/")
            .next()
            .unwrap_or(package_path);
        self.design_libraries.iter().any(|lib| lib == name)
    }

    fn load_component_manifest(&mut self, manifest_path: &Path) -> Result<(), ResolveError> {
        let manifest: CustomElementsManifest = read_json(&self.fs, manifest_path)?;
        let manifest_dir = manifest_path.parent().unwrap_or(Path::new("/"));

        for module in &manifest.modules {
            let module_path = normalize(&manifest_dir.join(&module.path))
                .to_string_lossy()
                .into_owned();
            for tag in module.declarations.iter().filter_map(|d| d.custom_element_tag()) {
                if let Some(previous) = self.component_map.get(tag) {
                    tracing::warn!(
                        "Tag <{}> was mapped to {}, overwriting with {}",
                        tag,
                        previous,
                        module_path
                    );
                }
                self.component_map
                    .insert(tag.to_string(), module_path.clone());
            }
        }
        Ok(())
    }

    fn load_template_manifest(&mut self, manifest_path: &Path) -> Result<(), ResolveError> {
        let manifest: TemplateManifest = read_json(&self.fs, manifest_path)?;
        if manifest.schema_version != TEMPLATE_SCHEMA_VERSION {
            tracing::warn!(
                "Skipping template manifest {} with unsupported schemaVersion {}",
                manifest_path.display(),
                manifest.schema_version
            );
            return Ok(());
        }
        let manifest_dir = manifest_path.parent().unwrap_or(Path::new("/"));

        let mut partials = Vec::with_capacity(manifest.partials.len());
        for partial in &manifest.partials {
            let path = normalize(&manifest_dir.join(&partial.path));
            let source = self
                .fs
                .read_to_string(&path)
                .map_err(|e| ResolveError::filesystem(&path, e))?;
            partials.push((partial.name.clone(), source));
        }

        for registration in &manifest.templates {
            let path = normalize(&manifest_dir.join(&registration.path));
            let source = self
                .fs
                .read_to_string(&path)
                .map_err(|e| ResolveError::filesystem(&path, e))?;
            let template =
                Template::compile_with_partials(&registration.name, &source, &partials)?;
            self.template_map
                .insert(registration.name.clone(), Arc::new(template));
        }
        Ok(())
    }

    /// Walk up from the working directory looking for `filename`.
    pub fn find_up(&self, filename: &str) -> Result<PathBuf, ResolveError> {
        for dir in self.working_dir.ancestors() {
            let candidate = dir.join(filename);
            if self.fs.is_file(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ResolveError::NotFound(format!(
            "file \"{}\" not found in any parent of {}",
            filename,
            self.working_dir.display()
        )))
    }

    /// Resolve `target` to an absolute path.
    ///
    /// A target starting with a configured prefix has the prefix substituted
    /// and `relative_to` is ignored. Otherwise the target is resolved against
    /// `relative_to`: the path itself when it ends with a separator, its
    /// parent directory when it names a file. Without `relative_to` the
    /// working directory is used.
    pub fn resolve_path(&self, target: &str, relative_to: Option<&Path>) -> PathBuf {
        for (prefix, replacement) in &self.prefixes {
            if let Some(rest) = target.strip_prefix(prefix.as_str()) {
                let substituted = format!("{}{}", replacement, rest);
                return absolutize(&self.working_dir, Path::new(&substituted));
            }
        }

        let base = match relative_to {
            Some(path) if has_trailing_separator(path) => path.to_path_buf(),
            Some(path) => path.parent().map(Path::to_path_buf).unwrap_or_default(),
            None => self.working_dir.clone(),
        };
        absolutize(&self.working_dir, &base.join(target))
    }

    /// Module path that registers the custom element `tag`.
    pub fn resolve_tag_name(&self, tag: &str) -> Option<&str> {
        self.component_map.get(tag).map(String::as_str)
    }

    /// Template registered under `name` by a template manifest.
    pub fn resolve_template_name(&self, name: &str) -> Option<Arc<Template>> {
        self.template_map.get(name).cloned()
    }

    pub fn component_count(&self) -> usize {
        self.component_map.len()
    }

    pub fn template_count(&self) -> usize {
        self.template_map.len()
    }

    /// Load the module a specifier names.
    ///
    /// The verbatim specifier is looked up first, then its resolved path.
    pub fn import(&self, specifier: &str, relative_to: Option<&Path>) -> Result<Module, ResolveError> {
        if let Some(module) = self.modules.get(specifier) {
            return Ok(module.clone());
        }
        let resolved = self.resolve_path(specifier, relative_to);
        tracing::trace!("Importing {} from {}", specifier, resolved.display());
        self.modules
            .get(resolved.to_string_lossy().as_ref())
            .cloned()
            .ok_or_else(|| {
                ResolveError::Resolution(format!(
                    "module \"{}\" (resolved to {})",
                    specifier,
                    resolved.display()
                ))
            })
    }

    pub fn import_source_processor(
        &self,
        specifier: &str,
        relative_to: Option<&Path>,
    ) -> Result<Arc<dyn SourceProcessor>, ResolveError> {
        match self.import(specifier, relative_to)? {
            Module::SourceProcessor(processor) => Ok(processor),
            other => Err(wrong_kind(specifier, "source processor", &other)),
        }
    }

    pub fn import_mock_generator(
        &self,
        specifier: &str,
        relative_to: Option<&Path>,
    ) -> Result<Arc<dyn MockGenerator>, ResolveError> {
        match self.import(specifier, relative_to)? {
            Module::MockGenerator(generator) => Ok(generator),
            other => Err(wrong_kind(specifier, "mock generator", &other)),
        }
    }

    pub fn import_handoff_handler(
        &self,
        specifier: &str,
        relative_to: Option<&Path>,
    ) -> Result<Arc<dyn HandoffHandler>, ResolveError> {
        match self.import(specifier, relative_to)? {
            Module::HandoffHandler(handler) => Ok(handler),
            other => Err(wrong_kind(specifier, "handoff handler", &other)),
        }
    }

    pub fn import_asset_processor(
        &self,
        specifier: &str,
        relative_to: Option<&Path>,
    ) -> Result<Arc<dyn AssetProcessor>, ResolveError> {
        match self.import(specifier, relative_to)? {
            Module::AssetProcessor(processor) => Ok(processor),
            other => Err(wrong_kind(specifier, "asset processor", &other)),
        }
    }

    /// Load an object from a sibling file of `path` with one of
    /// [`OBJECT_EXTENSIONS`].
    ///
    /// `path` has no extension. `.js`/`.mjs` files must have a data module
    /// registered under their path. Returns `None` when no candidate exists.
    pub fn load_object_from_file<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, ResolveError> {
        let path = absolutize(&self.working_dir, path);
        let (Some(dir), Some(base)) = (path.parent(), path.file_name()) else {
            return Ok(None);
        };
        let base = base.to_string_lossy();

        let entries = match self.fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ResolveError::filesystem(dir, e)),
        };

        let mut candidates: Vec<(usize, PathBuf)> = entries
            .iter()
            .filter(|entry| entry.is_file())
            .filter_map(|entry| {
                let name = Path::new(&entry.name);
                if name.file_stem()?.to_string_lossy() != base {
                    return None;
                }
                let ext = name.extension()?.to_string_lossy();
                let priority = OBJECT_EXTENSIONS.iter().position(|e| *e == ext)?;
                Some((priority, dir.join(&entry.name)))
            })
            .collect();
        candidates.sort_by_key(|(priority, _)| *priority);

        let Some((priority, file)) = candidates.first() else {
            tracing::trace!("No object file found for {}", path.display());
            return Ok(None);
        };
        if candidates.len() > 1 {
            tracing::warn!(
                "{} is ambiguous (multiple possible extensions), using {}",
                path.display(),
                file.display()
            );
        }

        let value = match OBJECT_EXTENSIONS[*priority] {
            "js" | "mjs" => match self.import(&file.to_string_lossy(), None)? {
                Module::Data(value) => {
                    serde_json::from_value(value).map_err(|e| ResolveError::parse(file, e))?
                }
                other => return Err(wrong_kind(&file.to_string_lossy(), "data object", &other)),
            },
            "toml" => {
                let source = self
                    .fs
                    .read_to_string(file)
                    .map_err(|e| ResolveError::filesystem(file, e))?;
                toml::from_str(&source).map_err(|e| ResolveError::parse(file, e))?
            }
            _ => read_json(&self.fs, file)?,
        };
        Ok(Some(value))
    }

    /// Load every specifier of a context file.
    ///
    /// Specifiers resolve relative to `file_path` (the context file itself),
    /// or to the working directory when it is `None`. Templates are looked
    /// up by name before being read from disk.
    pub fn initialize_context(
        &self,
        file: &ContextFile,
        file_path: Option<&Path>,
    ) -> Result<ResolvedContext, ResolveError> {
        let default_base = with_trailing_separator(&self.working_dir);
        let relative_to = Some(file_path.unwrap_or(default_base.as_path()));

        let mut context = ResolvedContext::from_data(file);

        if let Some(template) = &file.template {
            context.template = Some(match self.resolve_template_name(template) {
                Some(compiled) => compiled,
                None => {
                    let path = self.resolve_path(template, relative_to);
                    let source = self
                        .fs
                        .read_to_string(&path)
                        .map_err(|e| ResolveError::filesystem(&path, e))?;
                    Arc::new(Template::compile(&path.to_string_lossy(), &source)?)
                }
            });
        }
        if let Some(specifier) = &file.source_processor {
            context.source_processor = Some(self.import_source_processor(specifier, relative_to)?);
        }
        if let Some(specifier) = &file.mock_generator {
            context.mock_generator = Some(self.import_mock_generator(specifier, relative_to)?);
        }
        if let Some(specifier) = &file.handoff_handler {
            context.handoff_handler = Some(self.import_handoff_handler(specifier, relative_to)?);
        }

        Ok(context)
    }
}

fn wrong_kind(specifier: &str, expected: &'static str, found: &Module) -> ResolveError {
    ResolveError::WrongModuleKind {
        specifier: specifier.to_string(),
        expected,
        found: found.kind(),
    }
}
