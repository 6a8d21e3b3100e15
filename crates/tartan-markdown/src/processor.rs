//! Markdown rendering and the source processor built on it.

use std::collections::HashMap;

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::Serialize;
use serde_json::json;
use tartan_resolve::{PluginError, SourceProcessor, SourceProcessorInput, SourceProcessorOutput};

use crate::frontmatter::{split_frontmatter, Frontmatter, FrontmatterError};

/// Specifier the processor is registered under.
pub const MARKDOWN: &str = "tartan:markdown";

/// A table of contents entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocEntry {
    /// Heading text
    pub title: String,
    /// Anchor ID
    pub id: String,
    /// Heading level (1-6)
    pub level: u8,
}

/// A rendered Markdown document.
#[derive(Debug, Clone)]
pub struct RenderedDoc {
    pub frontmatter: Option<Frontmatter>,
    pub html: String,
    pub toc: Vec<TocEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum MarkdownError {
    #[error("Frontmatter error: {0}")]
    Frontmatter(#[from] FrontmatterError),

    #[error("Source is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
}

/// Render Markdown to HTML. Headings without an explicit id get one derived
/// from their text.
pub fn render(source: &str) -> Result<RenderedDoc, MarkdownError> {
    let (frontmatter, content) = split_frontmatter(source)?;
    let mut events: Vec<Event<'_>> = Parser::new_ext(content, options()).collect();

    let mut toc = Vec::new();
    let mut anchors: Vec<(usize, String)> = Vec::new();
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut current_heading: Option<(usize, u8, String)> = None; // (event index, level, text)

    for (i, event) in events.iter().enumerate() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current_heading = Some((i, *level as u8, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, heading_text)) = current_heading.as_mut() {
                    heading_text.push_str(text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((start, level, title)) = current_heading.take() {
                    let id = unique(slugify(&title), &mut used);
                    anchors.push((start, id.clone()));
                    toc.push(TocEntry { title, id, level });
                }
            }
            _ => {}
        }
    }

    for (index, anchor) in anchors {
        if let Some(Event::Start(Tag::Heading { id, .. })) = events.get_mut(index) {
            if id.is_none() {
                *id = Some(CowStr::from(anchor));
            }
        }
    }

    let mut html_output = String::new();
    html::push_html(&mut html_output, events.into_iter());

    Ok(RenderedDoc {
        frontmatter,
        html: html_output,
        toc,
    })
}

fn unique(slug: String, used: &mut HashMap<String, usize>) -> String {
    let count = used.entry(slug.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        slug
    } else {
        format!("{}-{}", slug, count)
    }
}

/// Convert a heading to a URL-safe slug.
fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else if c.is_whitespace() || c == '-' || c == '_' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Source processor for Markdown pages.
///
/// Extra metadata is `{"frontmatter": ..., "toc": [...]}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownProcessor;

impl MarkdownProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl SourceProcessor for MarkdownProcessor {
    fn process(
        &self,
        input: SourceProcessorInput<'_>,
    ) -> Result<SourceProcessorOutput, PluginError> {
        let source = std::str::from_utf8(input.source_contents)
            .map_err(|e| PluginError::new(MarkdownError::from(e).to_string()))?;
        let doc = render(source).map_err(|e| PluginError::new(e.to_string()))?;

        tracing::trace!(
            "Rendered {} ({} headings)",
            input.source_path.display(),
            doc.toc.len()
        );

        let output_dir = doc.frontmatter.as_ref().and_then(|fm| fm.slug.clone());
        Ok(SourceProcessorOutput {
            processed_contents: doc.html.into_bytes(),
            output_dir,
            extra_meta: Some(json!({
                "frontmatter": doc.frontmatter,
                "toc": doc.toc,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tartan_resolve::ResolvedContext;

    #[test]
    fn renders_markdown_with_anchors() {
        let doc = render("# Getting Started\n\nHello *world*.\n\n## Install `tartan`\n\n## Getting Started\n").unwrap();

        assert_eq!(
            doc.html,
            "<h1 id=\"getting-started\">Getting Started</h1>\n<p>Hello <em>world</em>.</p>\n<h2 id=\"install-tartan\">Install <code>tartan</code></h2>\n<h2 id=\"getting-started-2\">Getting Started</h2>\n"
        );
        assert_eq!(
            doc.toc,
            vec![
                TocEntry {
                    title: "Getting Started".to_string(),
                    id: "getting-started".to_string(),
                    level: 1,
                },
                TocEntry {
                    title: "Install tartan".to_string(),
                    id: "install-tartan".to_string(),
                    level: 2,
                },
                TocEntry {
                    title: "Getting Started".to_string(),
                    id: "getting-started-2".to_string(),
                    level: 2,
                },
            ]
        );
    }

    #[test]
    fn slugify_strips_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  spaced -- out  "), "spaced-out");
    }

    #[test]
    fn processor_exposes_frontmatter_and_slug() {
        let source = b"---\ntitle: Post\nslug: my-post\n---\n# Heading\n";
        let context = ResolvedContext::default();
        let output = MarkdownProcessor::new()
            .process(SourceProcessorInput {
                source_path: Path::new("/src/post.md"),
                source_contents: source,
                context: &context,
                subpage_meta: &[],
                depth: 1,
            })
            .unwrap();

        assert_eq!(output.output_dir.as_deref(), Some("my-post"));
        assert_eq!(
            String::from_utf8(output.processed_contents).unwrap(),
            "<h1 id=\"heading\">Heading</h1>\n"
        );
        let extra = output.extra_meta.unwrap();
        assert_eq!(extra["frontmatter"]["title"], "Post");
        assert_eq!(extra["toc"][0]["id"], "heading");
    }

    #[test]
    fn invalid_frontmatter_is_a_plugin_error() {
        let context = ResolvedContext::default();
        let err = MarkdownProcessor::new()
            .process(SourceProcessorInput {
                source_path: Path::new("/src/bad.md"),
                source_contents: b"---\ntitle: x\n",
                context: &context,
                subpage_meta: &[],
                depth: 0,
            })
            .unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }
}
