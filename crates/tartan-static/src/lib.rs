//! Static output for tartan source trees.
//!
//! Resolves the context of every path below a root directory, then renders
//! pages, bundles component scripts and copies assets into an output
//! directory.

pub mod assets;
pub mod builder;
pub mod bundle;
pub mod config;
pub mod error;
pub mod glob;
pub mod html;
pub mod page;
pub mod tree;

pub use assets::{AssetHandler, MinifyCss, MINIFY_CSS};
pub use builder::{BuildResult, Project};
pub use bundle::{Bundler, IifeBundler};
pub use config::{ProjectConfig, CONFIG_FILE};
pub use error::BuildError;
pub use html::{DependencyMap, HtmlOutput, HtmlProcessor};
pub use page::{OutputClaims, PageInput, PageProcessor};
pub use tree::{ContextTree, ContextTreeNode, TreeBuilder};
