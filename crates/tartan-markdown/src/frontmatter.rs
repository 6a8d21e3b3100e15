//! YAML frontmatter fenced by `---` lines at the top of a document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const FENCE: &str = "---";
const YAML_END: &str = "...";

/// Metadata block of a Markdown page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordering hint for listings, lowest first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Renames the page's output directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,

    /// Remaining keys, passed through to templates as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("Unclosed frontmatter: no closing --- line")]
    Unclosed,

    #[error("Frontmatter is not valid YAML: {0}")]
    InvalidYaml(String),
}

/// Split `source` into its frontmatter and the Markdown body that follows.
///
/// A document without an opening fence line is returned unchanged.
pub fn split_frontmatter(source: &str) -> Result<(Option<Frontmatter>, &str), FrontmatterError> {
    let Some(block) = after_opening_fence(source.trim_start()) else {
        return Ok((None, source));
    };

    let mut offset = 0;
    for line in block.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == FENCE || trimmed == YAML_END {
            let frontmatter = parse_yaml(&block[..offset])?;
            let body = &block[offset + line.len()..];
            return Ok((Some(frontmatter), body.trim_start()));
        }
        offset += line.len();
    }

    Err(FrontmatterError::Unclosed)
}

fn after_opening_fence(source: &str) -> Option<&str> {
    let line_end = source.find('\n')?;
    (source[..line_end].trim_end() == FENCE).then(|| &source[line_end + 1..])
}

fn parse_yaml(yaml: &str) -> Result<Frontmatter, FrontmatterError> {
    if yaml.trim().is_empty() {
        return Ok(Frontmatter::default());
    }
    serde_yaml::from_str(yaml).map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))
}
