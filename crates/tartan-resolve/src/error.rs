//! Error types for resolution and artifact loading.

use std::io;
use std::path::Path;

use crate::context::PageMode;

/// Errors raised while resolving paths, manifests and modules.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to resolve {0}")]
    Resolution(String),

    #[error("Module {specifier} is a {found}, expected a {expected}")]
    WrongModuleKind {
        specifier: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to compile template {name}: {message}")]
    Template { name: String, message: String },

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ResolveError {
    pub(crate) fn filesystem(path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn parse(path: &Path, message: impl ToString) -> Self {
        Self::Parse {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}

/// A context whose page mode is missing a field that mode requires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pageMode \"{mode}\" requires {field}")]
pub struct ContextError {
    pub mode: PageMode,
    pub field: &'static str,
}

/// Failure reported by a plugin (source processor, mock generator, handoff
/// handler or asset processor).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
