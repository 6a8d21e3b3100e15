//! Page processing: source processor, template, HTML post-processing and
//! output.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tartan_resolve::paths::{escapes, normalize, relative};
use tartan_resolve::{
    LayeredFs, ResolvedContext, SourceMeta, SourceProcessorInput, SourceProcessorOutput, SourceType,
    SubSourceMeta,
};

use crate::error::BuildError;
use crate::html::HtmlProcessor;

/// Name of the file written into each page's output directory.
pub const PAGE_FILE: &str = "index.html";

/// Output directories already claimed during one build.
#[derive(Debug, Default)]
pub struct OutputClaims {
    dirs: HashSet<PathBuf>,
}

impl OutputClaims {
    /// Claim `dir`, failing if another page already wrote there.
    pub fn claim(&mut self, dir: &Path) -> Result<(), BuildError> {
        if !self.dirs.insert(normalize(dir)) {
            return Err(BuildError::InvalidOutputDirectory(format!(
                "{} is used by more than one page",
                dir.display()
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

/// One page to process.
#[derive(Debug, Clone, Copy)]
pub struct PageInput<'a> {
    pub source_path: &'a Path,
    pub context: &'a Arc<ResolvedContext>,

    /// Output directory before any rename by the source processor
    pub output_dir: &'a Path,

    pub subpage_meta: &'a [SubSourceMeta],
    pub depth: usize,
}

pub struct PageProcessor<'a> {
    html: HtmlProcessor<'a>,
    fs: &'a LayeredFs,
}

impl<'a> PageProcessor<'a> {
    pub fn new(html: HtmlProcessor<'a>, fs: &'a LayeredFs) -> Self {
        Self { html, fs }
    }

    /// Build a single page and write it to disk.
    pub fn process(
        &self,
        input: PageInput<'_>,
        claims: &mut OutputClaims,
    ) -> Result<SourceMeta, BuildError> {
        let source_path = input.source_path;
        let contents = self
            .fs
            .read(source_path)
            .map_err(|e| BuildError::filesystem(source_path, e))?;

        let processed = match &input.context.source_processor {
            Some(processor) => processor
                .process(SourceProcessorInput {
                    source_path,
                    source_contents: &contents,
                    context: input.context,
                    subpage_meta: input.subpage_meta,
                    depth: input.depth,
                })
                .map_err(|e| BuildError::plugin(source_path, e))?,
            None => SourceProcessorOutput::new(contents),
        };

        let mut page_meta = SourceMeta {
            source_type: SourceType::Page,
            source_path: source_path.to_path_buf(),
            output_path: input.output_dir.to_path_buf(),
            context: Arc::clone(input.context),
            extra: processed.extra_meta.clone(),
        };

        let body = String::from_utf8_lossy(&processed.processed_contents);
        let rendered = match &input.context.template {
            Some(template) => template.render_page(
                &body,
                input.context.template_parameters.as_ref(),
                &page_meta,
                input.subpage_meta,
            )?,
            None => body.into_owned(),
        };

        let html = self.html.process(&rendered, source_path)?;

        let output_dir = match &processed.output_dir {
            Some(rename) => renamed_output_dir(input.output_dir, rename)?,
            None => input.output_dir.to_path_buf(),
        };
        claims.claim(&output_dir)?;

        fs::create_dir_all(&output_dir).map_err(|e| BuildError::filesystem(&output_dir, e))?;
        let page_file = output_dir.join(PAGE_FILE);
        fs::write(&page_file, html.content).map_err(|e| BuildError::filesystem(&page_file, e))?;

        for dependency in &html.dependencies {
            let bytes = self
                .fs
                .read(&dependency.source)
                .map_err(|e| BuildError::filesystem(&dependency.source, e))?;
            if let Some(parent) = dependency.output.parent() {
                fs::create_dir_all(parent).map_err(|e| BuildError::filesystem(parent, e))?;
            }
            fs::write(&dependency.output, bytes)
                .map_err(|e| BuildError::filesystem(&dependency.output, e))?;
        }

        tracing::debug!(
            "Wrote {} with {} dependencies",
            page_file.display(),
            html.dependencies.len()
        );

        page_meta.output_path = output_dir;
        Ok(page_meta)
    }
}

/// Apply a source processor's rename. The new directory must stay a strict
/// descendant of the original directory's parent.
fn renamed_output_dir(default: &Path, rename: &str) -> Result<PathBuf, BuildError> {
    let parent = default.parent().unwrap_or(Path::new("/"));
    let target = normalize(&parent.join(rename));
    let rel = relative(parent, &target);
    if rel.as_os_str().is_empty() || escapes(&rel) {
        return Err(BuildError::InvalidOutputDirectory(format!(
            "\"{}\" resolves to {}, outside {}",
            rename,
            target.display(),
            parent.display()
        )));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::IifeBundler;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tartan_resolve::{Module, Resolver, ResolverOptions, Template};
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        root: PathBuf,
        src: PathBuf,
        dist: PathBuf,
        resolver: Resolver,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let src = root.join("src/");
        let dist = root.join("dist");
        fs::create_dir_all(&src).unwrap();
        let resolver = Resolver::new(ResolverOptions {
            working_dir: root.clone(),
            ..Default::default()
        });
        Fixture {
            _temp: temp,
            root,
            src,
            dist,
            resolver,
        }
    }

    fn run(
        f: &Fixture,
        source: &Path,
        context: ResolvedContext,
        output_dir: &Path,
        claims: &mut OutputClaims,
    ) -> Result<SourceMeta, BuildError> {
        let bundler = IifeBundler::new();
        let html = HtmlProcessor::new(&f.resolver, &bundler, &f.src, &f.dist);
        let pages = PageProcessor::new(html, f.resolver.fs());
        pages.process(
            PageInput {
                source_path: source,
                context: &Arc::new(context),
                output_dir,
                subpage_meta: &[],
                depth: 0,
            },
            claims,
        )
    }

    #[test]
    fn plain_pages_are_copied_verbatim() {
        let f = fixture();
        let html = "<h1>Hello</h1>\n<p>World</p>\n";
        fs::write(f.src.join("index.html"), html).unwrap();

        let meta = run(
            &f,
            &f.src.join("index.html"),
            ResolvedContext::default(),
            &f.dist,
            &mut OutputClaims::default(),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(f.dist.join("index.html")).unwrap(), html);
        assert_eq!(meta.output_path, f.dist);
        assert_eq!(meta.source_type, SourceType::Page);
    }

    #[test]
    fn processor_and_template_shape_the_page() {
        let f = fixture();
        fs::write(f.src.join("post.txt"), "hello").unwrap();

        let Module::SourceProcessor(processor) = Module::source_processor(|input| {
            let text = String::from_utf8_lossy(input.source_contents).to_uppercase();
            Ok(SourceProcessorOutput {
                processed_contents: format!("<p>{}</p>", text).into_bytes(),
                output_dir: Some("renamed".to_string()),
                extra_meta: Some(json!({"title": "Post"})),
            })
        }) else {
            panic!("expected a source processor");
        };
        let template = Template::compile(
            "layout.html",
            "<main data-title=\"{{ pageMeta.extra.title }}\">{{ pageContent }}</main>{{ extraContext.footer }}",
        )
        .unwrap();
        let context = ResolvedContext {
            source_processor: Some(processor),
            template: Some(Arc::new(template)),
            template_parameters: Some(json!({"footer": "bye"})),
            ..Default::default()
        };

        let meta = run(
            &f,
            &f.src.join("post.txt"),
            context,
            &f.dist.join("post"),
            &mut OutputClaims::default(),
        )
        .unwrap();

        assert_eq!(meta.output_path, f.dist.join("renamed"));
        assert_eq!(meta.extra, Some(json!({"title": "Post"})));
        assert_eq!(
            fs::read_to_string(f.dist.join("renamed/index.html")).unwrap(),
            "<main data-title=\"Post\"><p>HELLO</p></main>bye"
        );
    }

    #[test]
    fn copies_dependencies() {
        let f = fixture();
        fs::create_dir_all(f.src.join("blog")).unwrap();
        fs::write(f.src.join("blog/index.html"), "<img src=\"cat.png\">").unwrap();
        fs::write(f.src.join("blog/cat.png"), b"meow").unwrap();

        run(
            &f,
            &f.src.join("blog/index.html"),
            ResolvedContext::default(),
            &f.dist.join("blog"),
            &mut OutputClaims::default(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(f.dist.join("blog/index.html")).unwrap(),
            "<img src=\"/blog/cat.png\">"
        );
        assert_eq!(fs::read(f.dist.join("blog/cat.png")).unwrap(), b"meow");
        assert!(f.root.join("dist/blog").is_dir());
    }

    #[test]
    fn rejects_duplicate_output_directories() {
        let f = fixture();
        fs::write(f.src.join("a.html"), "a").unwrap();
        fs::write(f.src.join("b.html"), "b").unwrap();
        let mut claims = OutputClaims::default();
        let out = f.dist.join("same");

        run(&f, &f.src.join("a.html"), ResolvedContext::default(), &out, &mut claims).unwrap();
        let err = run(&f, &f.src.join("b.html"), ResolvedContext::default(), &out, &mut claims)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidOutputDirectory(_)));
    }

    #[test]
    fn renames_must_stay_below_the_parent() {
        let default = Path::new("/out/blog/post");
        assert_eq!(
            renamed_output_dir(default, "nice-slug").unwrap(),
            PathBuf::from("/out/blog/nice-slug")
        );
        assert_eq!(
            renamed_output_dir(default, "2024/nice").unwrap(),
            PathBuf::from("/out/blog/2024/nice")
        );
        for bad in ["..", "../escape", ".", "", "/elsewhere"] {
            assert!(
                matches!(
                    renamed_output_dir(default, bad),
                    Err(BuildError::InvalidOutputDirectory(_))
                ),
                "{} should be rejected",
                bad
            );
        }
    }
}
