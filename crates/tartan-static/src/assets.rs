//! Asset handling.
//!
//! Assets are copied into their output directory unless a registered asset
//! processor claims them by glob.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use globset::GlobMatcher;
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use tartan_resolve::paths::relative;
use tartan_resolve::{AssetProcessor, AssetProcessorOutput, LayeredFs, PluginError};

use crate::error::BuildError;
use crate::glob::path_matcher;

/// Specifier the CSS minifier is registered under.
pub const MINIFY_CSS: &str = "tartan:minify-css";

struct Registration {
    glob: String,
    matcher: GlobMatcher,
    processor: Arc<dyn AssetProcessor>,
}

/// Glob-keyed registry of asset processors. The most recent registration
/// is consulted first.
#[derive(Default)]
pub struct AssetHandler {
    registry: Vec<Registration>,
}

impl AssetHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        glob: &str,
        processor: Arc<dyn AssetProcessor>,
    ) -> Result<(), BuildError> {
        let matcher = path_matcher(glob)?;
        self.registry.insert(
            0,
            Registration {
                glob: glob.to_string(),
                matcher,
                processor,
            },
        );
        tracing::debug!("Registered asset processor for {}", glob);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Write `source_path` into `output_dir`, returning the file name used.
    ///
    /// Globs are matched against the path relative to `root_dir`.
    pub fn process(
        &self,
        fs_layers: &LayeredFs,
        root_dir: &Path,
        source_path: &Path,
        output_dir: &Path,
    ) -> Result<String, BuildError> {
        let contents = fs_layers
            .read(source_path)
            .map_err(|e| BuildError::filesystem(source_path, e))?;
        let basename = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BuildError::Config(format!("asset {} has no file name", source_path.display()))
            })?;
        let rel = relative(root_dir, source_path);
        let rel = rel.to_string_lossy().replace('\\', "/");

        fs::create_dir_all(output_dir).map_err(|e| BuildError::filesystem(output_dir, e))?;

        let registration = self.registry.iter().find(|r| r.matcher.is_match(&rel));
        let (filename, bytes) = match registration {
            Some(registration) => {
                tracing::debug!("Processing {} with {}", rel, registration.glob);
                let output = registration
                    .processor
                    .process(&contents, &basename)
                    .map_err(|e| BuildError::plugin(source_path, e))?;
                (
                    output.filename.unwrap_or(basename),
                    output.processed_contents,
                )
            }
            None => (basename, contents),
        };

        let output_path = output_dir.join(&filename);
        fs::write(&output_path, bytes).map_err(|e| BuildError::filesystem(&output_path, e))?;
        Ok(filename)
    }
}

/// Minifies CSS with lightningcss, keeping the file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinifyCss;

impl MinifyCss {
    pub fn minify(css: &str) -> Result<String, String> {
        let stylesheet = StyleSheet::parse(css, ParserOptions::default())
            .map_err(|e| format!("CSS parse error: {}", e))?;

        let minified = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                ..Default::default()
            })
            .map_err(|e| format!("CSS minify error: {}", e))?;

        Ok(minified.code)
    }
}

impl AssetProcessor for MinifyCss {
    fn process(&self, contents: &[u8], _filename: &str) -> Result<AssetProcessorOutput, PluginError> {
        let css = std::str::from_utf8(contents).map_err(|e| PluginError::new(e.to_string()))?;
        Ok(AssetProcessorOutput {
            processed_contents: Self::minify(css)?.into_bytes(),
            filename: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tartan_resolve::Module;
    use tempfile::tempdir;

    fn upper(tag: &'static str) -> Arc<dyn AssetProcessor> {
        let module = Module::asset_processor(move |contents, filename| {
            Ok(AssetProcessorOutput {
                processed_contents: [tag.as_bytes(), contents].concat(),
                filename: Some(format!("{}.out", filename)),
            })
        });
        let Module::AssetProcessor(processor) = module else {
            panic!("expected an asset processor");
        };
        processor
    }

    #[test]
    fn copies_unmatched_assets() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("img/cat.png"), b"png").unwrap();

        let out = temp.path().join("dist/img");
        let handler = AssetHandler::new();
        let name = handler
            .process(&LayeredFs::new(), &root, &root.join("img/cat.png"), &out)
            .unwrap();

        assert_eq!(name, "cat.png");
        assert_eq!(fs::read(out.join("cat.png")).unwrap(), b"png");
    }

    #[test]
    fn newest_matching_processor_wins() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("src");
        fs::create_dir_all(root.join("styles")).unwrap();
        fs::write(root.join("styles/site.css"), b"body{}").unwrap();

        let mut handler = AssetHandler::new();
        handler.register("**/*.css", upper("first:")).unwrap();
        handler.register("styles/*.css", upper("second:")).unwrap();
        handler.register("*.js", upper("js:")).unwrap();
        assert_eq!(handler.len(), 3);

        let out = temp.path().join("dist/styles");
        let name = handler
            .process(&LayeredFs::new(), &root, &root.join("styles/site.css"), &out)
            .unwrap();

        assert_eq!(name, "site.css.out");
        assert_eq!(fs::read(out.join("site.css.out")).unwrap(), b"second:body{}");
    }

    #[test]
    fn minifies_css() {
        let minified = MinifyCss::minify("body {\n  color: red;\n}\n").unwrap();
        assert_eq!(minified, "body{color:red}");

        let output = MinifyCss.process(b"a { margin: 0px; }", "a.css").unwrap();
        assert_eq!(output.filename, None);
        assert!(!output.processed_contents.is_empty());
    }
}
