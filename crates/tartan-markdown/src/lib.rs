//! Markdown source processor with YAML frontmatter.
//!
//! Renders Markdown pages to HTML. Frontmatter and the table of contents are
//! exposed to ancestor pages as extra metadata, and a frontmatter `slug`
//! renames the page's output directory.

pub mod frontmatter;
pub mod processor;

pub use frontmatter::{split_frontmatter, Frontmatter, FrontmatterError};
pub use processor::{render, MarkdownError, MarkdownProcessor, RenderedDoc, TocEntry, MARKDOWN};
