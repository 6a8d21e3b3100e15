//! HTML post-processing for rendered pages.
//!
//! Finds custom elements with a registered implementation, bundles their
//! modules into an inline script, and rewrites local `href`, `src` and
//! `srcset` references to their location in the output directory.
//!
//! Both passes stream over the markup with `lol_html`, so everything outside
//! a rewritten start tag is written back byte for byte.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use lol_html::html_content::{ContentType, Element};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tartan_resolve::paths::{escapes, normalize, relative, to_url_path};
use tartan_resolve::Resolver;

use crate::bundle::{entry_program, Bundler};
use crate::error::BuildError;

/// Attributes that may reference a local file.
const DEPENDENCY_ATTRIBUTES: &[&str] = &["href", "src", "srcset"];

/// Output subdirectory for dependencies outside the root directory.
const EXTERNAL_ASSETS_DIR: &str = "assets";

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("Invalid scheme regex"));

/// A file the page references, and where it is copied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyMap {
    pub source: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlOutput {
    pub content: String,

    /// Unique by output path, in document order
    pub dependencies: Vec<DependencyMap>,
}

/// Custom elements found on a page.
#[derive(Debug, Default)]
struct PageScan {
    /// Implementing modules, deduplicated in document order
    modules: Vec<String>,
    has_body: bool,
}

/// Processes rendered page HTML.
pub struct HtmlProcessor<'a> {
    resolver: &'a Resolver,
    bundler: &'a dyn Bundler,
    root_dir: &'a Path,
    output_dir: &'a Path,
}

impl<'a> HtmlProcessor<'a> {
    pub fn new(
        resolver: &'a Resolver,
        bundler: &'a dyn Bundler,
        root_dir: &'a Path,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            resolver,
            bundler,
            root_dir,
            output_dir,
        }
    }

    /// Process `html` rendered for the page at `page_path`.
    pub fn process(&self, html: &str, page_path: &Path) -> Result<HtmlOutput, BuildError> {
        let scan = self.scan(html)?;

        let script = if scan.modules.is_empty() {
            None
        } else {
            let bundle = self.bundler.bundle(
                self.resolver.fs(),
                &entry_program(&scan.modules),
                self.resolver.working_dir(),
            )?;
            tracing::debug!(
                "Bundled {} components for {}",
                scan.modules.len(),
                page_path.display()
            );
            Some(inline_script(&bundle))
        };

        let mut rewriter = DependencyRewriter {
            processor: self,
            page_path,
            seen: HashSet::new(),
            dependencies: Vec::new(),
        };
        let mut body_script = script.as_deref().filter(|_| scan.has_body);

        let rewritten = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("*", |el| {
                    if el.tag_name() == "body" {
                        if let Some(script) = body_script.take() {
                            el.prepend(script, ContentType::Html);
                        }
                    }
                    // links are navigation, not dependencies
                    if el.tag_name() != "a" {
                        rewriter.rewrite_element(el).map_err(|e| e.to_string())?;
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )
        .map_err(|e| BuildError::Html(e.to_string()))?;

        let content = match script {
            Some(script) if !scan.has_body => format!("{}{}", script, rewritten),
            _ => rewritten,
        };
        Ok(HtmlOutput {
            content,
            dependencies: rewriter.dependencies,
        })
    }

    /// Find registered custom elements and whether the page has a `<body>`.
    fn scan(&self, html: &str) -> Result<PageScan, BuildError> {
        let scan = RefCell::new(PageScan::default());
        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("*", |el| {
                    let name = el.tag_name();
                    let mut scan = scan.borrow_mut();
                    if name == "body" {
                        scan.has_body = true;
                    } else if name.contains('-') {
                        if let Some(module) = self.resolver.resolve_tag_name(&name) {
                            if !scan.modules.iter().any(|m| m == module) {
                                scan.modules.push(module.to_string());
                            }
                        }
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        )
        .map_err(|e| BuildError::Html(e.to_string()))?;
        Ok(scan.into_inner())
    }

    /// Output location of a referenced file.
    fn output_for(&self, source: &Path) -> PathBuf {
        let rel = relative(self.root_dir, source);
        if escapes(&rel) {
            let digest = hex::encode(Sha256::digest(source.to_string_lossy().as_bytes()));
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.output_dir
                .join(EXTERNAL_ASSETS_DIR)
                .join(format!("{}-{}", digest, name))
        } else {
            self.output_dir.join(rel)
        }
    }
}

/// Wrap a bundle in a `<script>` element. A literal `</script` inside the
/// bundle would end the element early.
fn inline_script(bundle: &str) -> String {
    format!("<script>{}</script>", bundle.replace("</script", "<\\/script"))
}

struct DependencyRewriter<'p, 'a> {
    processor: &'p HtmlProcessor<'a>,
    page_path: &'p Path,
    seen: HashSet<PathBuf>,
    dependencies: Vec<DependencyMap>,
}

impl DependencyRewriter<'_, '_> {
    fn rewrite_element(&mut self, element: &mut Element<'_, '_>) -> Result<(), BuildError> {
        for name in DEPENDENCY_ATTRIBUTES {
            let Some(value) = element.get_attribute(name) else {
                continue;
            };
            let rewritten = if *name == "srcset" {
                self.rewrite_srcset(&value)
            } else {
                self.rewrite_url(&value)
            };
            if rewritten != value {
                element
                    .set_attribute(name, &rewritten)
                    .map_err(|e| BuildError::Html(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn rewrite_srcset(&mut self, value: &str) -> String {
        value
            .split(',')
            .map(|candidate| {
                let candidate = candidate.trim();
                match candidate.split_once(char::is_whitespace) {
                    Some((url, descriptor)) => {
                        format!("{} {}", self.rewrite_url(url), descriptor.trim())
                    }
                    None => self.rewrite_url(candidate),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn rewrite_url(&mut self, url: &str) -> String {
        if url.is_empty() || url.starts_with('#') || url.starts_with("//") || SCHEME_RE.is_match(url)
        {
            return url.to_string();
        }
        let (path, suffix) = match url.find(['?', '#']) {
            Some(i) => url.split_at(i),
            None => (url, ""),
        };
        if path.is_empty() {
            return url.to_string();
        }

        let source = normalize(&self.processor.resolver.resolve_path(path, Some(self.page_path)));
        let output = self.processor.output_for(&source);
        let rewritten = to_url_path(&relative(self.processor.output_dir, &output));

        if self.seen.insert(output.clone()) {
            self.dependencies.push(DependencyMap { source, output });
        }
        format!("{}{}", rewritten, suffix)
    }
}
