//! Build errors. Every one of them aborts the build.

use std::io;
use std::path::Path;

use tartan_resolve::{ContextError, PluginError, ResolveError};

/// Errors that can occur during build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid output directory: {0}")]
    InvalidOutputDirectory(String),

    #[error("Mock expansion failed: {0}")]
    MockExpansion(String),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to render template: {0}")]
    Template(String),

    #[error("Plugin failed for {path}: {message}")]
    Plugin { path: String, message: String },

    #[error("Failed to bundle components: {0}")]
    Bundle(String),

    #[error("Failed to rewrite HTML: {0}")]
    Html(String),
}

impl BuildError {
    pub(crate) fn filesystem(path: &Path, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn plugin(path: &Path, error: PluginError) -> Self {
        Self::Plugin {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<ContextError> for BuildError {
    fn from(error: ContextError) -> Self {
        Self::Config(error.to_string())
    }
}

impl From<minijinja::Error> for BuildError {
    fn from(error: minijinja::Error) -> Self {
        Self::Template(error.to_string())
    }
}
