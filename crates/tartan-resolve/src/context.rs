//! Context files and resolved contexts.
//!
//! A [`ContextFile`] is the raw on-disk shape of a `tartan.context` file.
//! [`Resolver::initialize_context`](crate::Resolver::initialize_context)
//! turns it into a [`ResolvedContext`], with every specifier replaced by the
//! loaded artifact.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::ContextError;
use crate::module::{HandoffHandler, MockGenerator, SourceProcessor};
use crate::template::Template;

/// How a directory produces pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    /// The directory is one page, built from `pageSource`.
    Directory,
    /// Every file matching `pagePattern` is its own page.
    File,
    /// Files matching `pagePattern` are copied as assets.
    Asset,
    /// The directory's contents are generated in memory.
    Mock,
    /// An external handler builds the whole subtree.
    Handoff,
}

impl fmt::Display for PageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageMode::Directory => "directory",
            PageMode::File => "file",
            PageMode::Asset => "asset",
            PageMode::Mock => "mock",
            PageMode::Handoff => "handoff",
        };
        f.write_str(name)
    }
}

/// The raw shape of a context file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ContextFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_mode: Option<PageMode>,

    /// Glob for `file` and `asset` modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_pattern: Option<String>,

    /// Index file of the directory, regardless of mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_source: Option<String>,

    /// Template path or registered template name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_processor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_generator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_handler: Option<String>,

    /// Extra values handed to the template as `extraContext`
    #[serde(
        default,
        rename = "handlebarsParameters",
        alias = "templateParameters",
        skip_serializing_if = "Option::is_none"
    )]
    pub template_parameters: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_assets: Option<Vec<String>>,
}

/// The base context used when nothing else applies.
pub fn default_root_context() -> ContextFile {
    ContextFile {
        page_mode: Some(PageMode::Directory),
        page_source: Some("index.html".to_string()),
        ..Default::default()
    }
}

/// A context with every specifier loaded.
///
/// Artifacts are shared by reference between every node that inherits them.
#[derive(Clone, Default)]
pub struct ResolvedContext {
    pub inherit: Option<bool>,
    pub page_mode: Option<PageMode>,
    pub page_pattern: Option<String>,
    pub page_source: Option<String>,
    pub template: Option<Arc<Template>>,
    pub source_processor: Option<Arc<dyn SourceProcessor>>,
    pub mock_generator: Option<Arc<dyn MockGenerator>>,
    pub handoff_handler: Option<Arc<dyn HandoffHandler>>,
    pub template_parameters: Option<Value>,
    pub extra_assets: Option<Vec<String>>,
}

/// What a context's page mode needs, with the fields that mode requires.
pub enum ModeSpec<'a> {
    Directory {
        page_source: Option<&'a str>,
    },
    File {
        page_pattern: &'a str,
        page_source: Option<&'a str>,
    },
    Asset {
        page_pattern: &'a str,
    },
    Mock {
        generator: &'a Arc<dyn MockGenerator>,
    },
    Handoff {
        handler: &'a Arc<dyn HandoffHandler>,
    },
}

impl ModeSpec<'_> {
    pub fn page_mode(&self) -> PageMode {
        match self {
            ModeSpec::Directory { .. } => PageMode::Directory,
            ModeSpec::File { .. } => PageMode::File,
            ModeSpec::Asset { .. } => PageMode::Asset,
            ModeSpec::Mock { .. } => PageMode::Mock,
            ModeSpec::Handoff { .. } => PageMode::Handoff,
        }
    }
}

impl ResolvedContext {
    /// A context carrying only the data fields of `file`.
    ///
    /// Specifier fields are ignored; use the resolver to load them.
    pub fn from_data(file: &ContextFile) -> Self {
        Self {
            inherit: file.inherit,
            page_mode: file.page_mode,
            page_pattern: file.page_pattern.clone(),
            page_source: file.page_source.clone(),
            template_parameters: file.template_parameters.clone(),
            extra_assets: file.extra_assets.clone(),
            ..Default::default()
        }
    }

    /// The page mode, defaulting to `directory`.
    pub fn page_mode(&self) -> PageMode {
        self.page_mode.unwrap_or(PageMode::Directory)
    }

    /// Capability view of this context, checking the fields its mode requires.
    pub fn mode(&self) -> Result<ModeSpec<'_>, ContextError> {
        let missing = |field| ContextError {
            mode: self.page_mode(),
            field,
        };
        let page_source = self.page_source.as_deref();

        Ok(match self.page_mode() {
            PageMode::Directory => ModeSpec::Directory { page_source },
            PageMode::File => ModeSpec::File {
                page_pattern: self
                    .page_pattern
                    .as_deref()
                    .ok_or_else(|| missing("pagePattern"))?,
                page_source,
            },
            PageMode::Asset => ModeSpec::Asset {
                page_pattern: self
                    .page_pattern
                    .as_deref()
                    .ok_or_else(|| missing("pagePattern"))?,
            },
            PageMode::Mock => ModeSpec::Mock {
                generator: self
                    .mock_generator
                    .as_ref()
                    .ok_or_else(|| missing("mockGenerator"))?,
            },
            PageMode::Handoff => ModeSpec::Handoff {
                handler: self
                    .handoff_handler
                    .as_ref()
                    .ok_or_else(|| missing("handoffHandler"))?,
            },
        })
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == ResolvedContext::default()
    }
}

/// Shallow override of `overlay` on top of `base`.
///
/// When `overlay.inherit` is `false` the base is replaced by `root` and the
/// `inherit` key is dropped from the overlay.
pub fn merge(
    base: &ResolvedContext,
    overlay: &ResolvedContext,
    root: &ResolvedContext,
) -> ResolvedContext {
    let (base, inherit) = if overlay.inherit == Some(false) {
        (root, None)
    } else {
        (base, overlay.inherit)
    };

    ResolvedContext {
        inherit: inherit.or(base.inherit),
        page_mode: overlay.page_mode.or(base.page_mode),
        page_pattern: overlay
            .page_pattern
            .clone()
            .or_else(|| base.page_pattern.clone()),
        page_source: overlay
            .page_source
            .clone()
            .or_else(|| base.page_source.clone()),
        template: overlay.template.clone().or_else(|| base.template.clone()),
        source_processor: overlay
            .source_processor
            .clone()
            .or_else(|| base.source_processor.clone()),
        mock_generator: overlay
            .mock_generator
            .clone()
            .or_else(|| base.mock_generator.clone()),
        handoff_handler: overlay
            .handoff_handler
            .clone()
            .or_else(|| base.handoff_handler.clone()),
        template_parameters: overlay
            .template_parameters
            .clone()
            .or_else(|| base.template_parameters.clone()),
        extra_assets: overlay
            .extra_assets
            .clone()
            .or_else(|| base.extra_assets.clone()),
    }
}

fn same_artifact<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for ResolvedContext {
    fn eq(&self, other: &Self) -> bool {
        self.inherit == other.inherit
            && self.page_mode == other.page_mode
            && self.page_pattern == other.page_pattern
            && self.page_source == other.page_source
            && same_artifact(&self.template, &other.template)
            && same_artifact(&self.source_processor, &other.source_processor)
            && same_artifact(&self.mock_generator, &other.mock_generator)
            && same_artifact(&self.handoff_handler, &other.handoff_handler)
            && self.template_parameters == other.template_parameters
            && self.extra_assets == other.extra_assets
    }
}

impl fmt::Debug for ResolvedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded = |set: bool| if set { Some("<loaded>") } else { None };
        f.debug_struct("ResolvedContext")
            .field("inherit", &self.inherit)
            .field("page_mode", &self.page_mode)
            .field("page_pattern", &self.page_pattern)
            .field("page_source", &self.page_source)
            .field("template", &self.template.as_ref().map(|t| t.name()))
            .field("source_processor", &loaded(self.source_processor.is_some()))
            .field("mock_generator", &loaded(self.mock_generator.is_some()))
            .field("handoff_handler", &loaded(self.handoff_handler.is_some()))
            .field("template_parameters", &self.template_parameters)
            .field("extra_assets", &self.extra_assets)
            .finish()
    }
}

/// Serialized view handed to templates and plugins. Loaded callables are
/// omitted; the template shows up by name.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    inherit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_mode: Option<PageMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_pattern: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handlebars_parameters: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_assets: Option<&'a [String]>,
}

impl Serialize for ResolvedContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ContextView {
            inherit: self.inherit,
            page_mode: self.page_mode,
            page_pattern: self.page_pattern.as_deref(),
            page_source: self.page_source.as_deref(),
            template: self.template.as_ref().map(|t| t.name()),
            handlebars_parameters: self.template_parameters.as_ref(),
            extra_assets: self.extra_assets.as_deref(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use pretty_assertions::assert_eq;

    fn data(json: &str) -> ResolvedContext {
        let file: ContextFile = serde_json::from_str(json).unwrap();
        ResolvedContext::from_data(&file)
    }

    #[test]
    fn parses_context_files() {
        let file: ContextFile = serde_json::from_str(
            r#"{"pageMode": "file", "pagePattern": "*.md", "handlebarsParameters": {"a": 1}}"#,
        )
        .unwrap();
        assert_eq!(file.page_mode, Some(PageMode::File));
        assert_eq!(file.page_pattern.as_deref(), Some("*.md"));
        assert_eq!(file.template_parameters, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: Result<ContextFile, _> = serde_json::from_str(r#"{"pageMood": "file"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn overlay_wins_key_by_key() {
        let base = data(r#"{"pageMode": "directory", "pageSource": "index.html"}"#);
        let overlay = data(r#"{"pageSource": "page.md"}"#);
        let root = ResolvedContext::from_data(&default_root_context());

        let merged = merge(&base, &overlay, &root);
        assert_eq!(merged, data(r#"{"pageMode": "directory", "pageSource": "page.md"}"#));
    }

    #[test]
    fn inherit_false_falls_back_to_root() {
        let root = ResolvedContext::from_data(&default_root_context());
        let base = data(r#"{"pageMode": "file", "pageSource": "index.md", "pagePattern": "*.md"}"#);
        let overlay = data(r#"{"inherit": false}"#);

        let merged = merge(&base, &overlay, &root);
        assert_eq!(merged, root);
        assert_eq!(merged.inherit, None);
    }

    #[test]
    fn mode_requires_pattern() {
        let ctx = data(r#"{"pageMode": "asset"}"#);
        let err = ctx.mode().err().unwrap();
        assert_eq!(
            err,
            ContextError {
                mode: PageMode::Asset,
                field: "pagePattern"
            }
        );
        assert_eq!(err.to_string(), "pageMode \"asset\" requires pagePattern");
    }

    #[test]
    fn artifacts_compare_by_identity() {
        let Module::SourceProcessor(processor) =
            Module::source_processor(|input| Ok(crate::SourceProcessorOutput::new(input.source_contents)))
        else {
            unreachable!()
        };
        let a = ResolvedContext {
            source_processor: Some(processor.clone()),
            ..Default::default()
        };
        let b = ResolvedContext {
            source_processor: Some(processor),
            ..Default::default()
        };
        assert_eq!(a, b);
        assert_ne!(a, ResolvedContext::default());
    }

    #[test]
    fn serializes_without_callables() {
        let ctx = data(r#"{"pageMode": "directory", "pageSource": "index.html", "handlebarsParameters": {"title": "x"}}"#);
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "pageMode": "directory",
                "pageSource": "index.html",
                "handlebarsParameters": {"title": "x"}
            })
        );
    }
}
