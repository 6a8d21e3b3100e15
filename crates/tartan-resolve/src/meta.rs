//! Build-result metadata for processed sources.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::context::ResolvedContext;

/// Whether a tree node produces a page or an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Page,
    Asset,
}

/// Metadata about one processed source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMeta {
    pub source_type: SourceType,

    /// Absolute path of the source file (or directory, for handoffs)
    pub source_path: PathBuf,

    /// Output directory for pages, output file for assets
    pub output_path: PathBuf,

    /// Merged context the source was built with
    pub context: Arc<ResolvedContext>,

    /// Extra metadata from the source processor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Metadata about a descendant, seen from the page processing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubSourceMeta {
    #[serde(flatten)]
    pub meta: SourceMeta,

    /// Levels between the descendant and the current page, always at least 1
    pub distance: usize,

    /// Levels between the descendant and the root directory
    pub depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_meta_serializes_flat() {
        let meta = SubSourceMeta {
            meta: SourceMeta {
                source_type: SourceType::Page,
                source_path: PathBuf::from("/src/a/index.html"),
                output_path: PathBuf::from("/out/a"),
                context: Arc::new(ResolvedContext::default()),
                extra: Some(serde_json::json!({"title": "A"})),
            },
            distance: 1,
            depth: 2,
        };

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sourceType"], "page");
        assert_eq!(value["outputPath"], "/out/a");
        assert_eq!(value["extra"]["title"], "A");
        assert_eq!(value["distance"], 1);
        assert_eq!(value["depth"], 2);
    }
}
