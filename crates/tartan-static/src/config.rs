//! Project configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tartan_resolve::paths::{absolutize, with_trailing_separator};
use tartan_resolve::{default_root_context, ContextFile, Resolver, ResolverOptions};

use crate::error::BuildError;

/// Config file name, without extension.
pub const CONFIG_FILE: &str = "tartan.config";

/// Configuration for building a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Source directory
    pub root_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Literal path prefix to replacement directory
    #[serde(default)]
    pub path_prefixes: BTreeMap<String, String>,

    /// Packages whose component and template manifests are aggregated
    #[serde(default)]
    pub design_libraries: Vec<String>,

    /// Asset glob to asset processor specifier, registered in key order
    #[serde(default)]
    pub extra_asset_processors: BTreeMap<String, String>,

    /// Context used where no context file applies
    #[serde(default)]
    pub root_context: Option<ContextFile>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self::new("src", "dist")
    }
}

impl ProjectConfig {
    pub fn new(root_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            output_dir: output_dir.into(),
            path_prefixes: BTreeMap::new(),
            design_libraries: Vec::new(),
            extra_asset_processors: BTreeMap::new(),
            root_context: None,
        }
    }

    /// Load a config file.
    ///
    /// `path` has no extension; `.js`, `.mjs`, `.toml` and `.json` siblings
    /// are tried in that order.
    pub fn load(working_dir: &Path, path: &Path) -> Result<Self, BuildError> {
        let resolver = Resolver::new(ResolverOptions {
            working_dir: working_dir.to_path_buf(),
            ..Default::default()
        });
        resolver
            .load_object_from_file::<ProjectConfig>(path)?
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "no config file found at {}",
                    absolutize(working_dir, path).display()
                ))
            })
    }

    /// Make `root_dir` and `output_dir` absolute. `root_dir` keeps a
    /// trailing separator.
    pub fn normalized(mut self, working_dir: &Path) -> Self {
        self.root_dir = with_trailing_separator(&absolutize(working_dir, &self.root_dir));
        self.output_dir = absolutize(working_dir, &self.output_dir);
        self
    }

    /// The configured root context, or the built-in default.
    pub fn root_context_file(&self) -> ContextFile {
        self.root_context.clone().unwrap_or_else(default_root_context)
    }

    pub fn resolver_options(&self, working_dir: &Path) -> ResolverOptions {
        ResolverOptions {
            working_dir: working_dir.to_path_buf(),
            path_prefixes: self.path_prefixes.clone(),
            design_libraries: self.design_libraries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tartan_resolve::PageMode;
    use tempfile::tempdir;

    #[test]
    fn loads_json_config() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("tartan.config.json"),
            r#"{
                "rootDir": "site",
                "outputDir": "public",
                "pathPrefixes": {"~": "vendor"},
                "rootContext": {"pageMode": "file", "pagePattern": "*.md"}
            }"#,
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path(), Path::new(CONFIG_FILE)).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("site"));
        assert_eq!(config.path_prefixes.get("~").map(String::as_str), Some("vendor"));
        assert_eq!(
            config.root_context_file().page_mode,
            Some(PageMode::File)
        );
    }

    #[test]
    fn loads_toml_config() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("tartan.config.toml"),
            "rootDir = \"src\"\noutputDir = \"out\"\ndesignLibraries = [\"ui-kit\"]\n",
        )
        .unwrap();

        let config = ProjectConfig::load(temp.path(), Path::new(CONFIG_FILE)).unwrap();
        assert_eq!(config.design_libraries, vec!["ui-kit".to_string()]);
        assert_eq!(config.root_context_file(), default_root_context());
    }

    #[test]
    fn missing_config_is_an_error() {
        let temp = tempdir().unwrap();
        let err = ProjectConfig::load(temp.path(), Path::new(CONFIG_FILE)).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[test]
    fn normalizes_directories() {
        let config = ProjectConfig::new("./src", "dist/../public").normalized(Path::new("/work"));
        assert_eq!(config.root_dir, PathBuf::from("/work/src/"));
        assert!(config.root_dir.to_string_lossy().ends_with('/'));
        assert_eq!(config.output_dir, PathBuf::from("/work/public"));
    }
}
