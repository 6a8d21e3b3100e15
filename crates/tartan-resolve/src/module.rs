//! Plugin interfaces and the loadable module type.
//!
//! Context files name their source processor, mock generator and handoff
//! handler by specifier. Embedders register implementations of these traits
//! with the [`Resolver`](crate::Resolver) under those specifiers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::context::ResolvedContext;
use crate::error::PluginError;
use crate::meta::SubSourceMeta;

/// A generated virtual directory: relative path to file contents.
///
/// Keys ending in `/` denote empty directories.
pub type MockDirectory = BTreeMap<String, Vec<u8>>;

/// Data handed to a source processor.
#[derive(Debug, Clone, Copy)]
pub struct SourceProcessorInput<'a> {
    /// Absolute path of the page source
    pub source_path: &'a Path,

    /// Raw contents of the page source
    pub source_contents: &'a [u8],

    /// Fully merged context for the page
    pub context: &'a ResolvedContext,

    /// Metadata from every descendant page
    pub subpage_meta: &'a [SubSourceMeta],

    /// Depth of the page below the root directory
    pub depth: usize,
}

/// Result of a source processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceProcessorOutput {
    /// Processed page body
    pub processed_contents: Vec<u8>,

    /// Rename of the page's output directory, relative to its parent
    pub output_dir: Option<String>,

    /// Extra metadata exposed to ancestor pages
    pub extra_meta: Option<Value>,
}

impl SourceProcessorOutput {
    pub fn new(processed_contents: impl Into<Vec<u8>>) -> Self {
        Self {
            processed_contents: processed_contents.into(),
            ..Default::default()
        }
    }
}

/// Result of an asset processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetProcessorOutput {
    pub processed_contents: Vec<u8>,

    /// Replacement file name, if the processor renames the asset
    pub filename: Option<String>,
}

/// Turns page source bytes into page content.
pub trait SourceProcessor: Send + Sync {
    fn process(&self, input: SourceProcessorInput<'_>)
        -> Result<SourceProcessorOutput, PluginError>;
}

/// Produces the contents of a virtual (`mock`) directory.
pub trait MockGenerator: Send + Sync {
    fn generate(&self) -> Result<MockDirectory, PluginError>;
}

/// Takes over output for a whole subtree.
pub trait HandoffHandler: Send + Sync {
    fn handoff(&self, output_dir: &Path) -> Result<(), PluginError>;
}

/// Transforms a single asset file.
pub trait AssetProcessor: Send + Sync {
    fn process(&self, contents: &[u8], filename: &str)
        -> Result<AssetProcessorOutput, PluginError>;
}

/// Adapts a closure to one of the plugin traits.
struct FnPlugin<F>(F);

impl<F> SourceProcessor for FnPlugin<F>
where
    F: for<'a> Fn(SourceProcessorInput<'a>) -> Result<SourceProcessorOutput, PluginError>
        + Send
        + Sync,
{
    fn process(
        &self,
        input: SourceProcessorInput<'_>,
    ) -> Result<SourceProcessorOutput, PluginError> {
        (self.0)(input)
    }
}

impl<F> MockGenerator for FnPlugin<F>
where
    F: Fn() -> Result<MockDirectory, PluginError> + Send + Sync,
{
    fn generate(&self) -> Result<MockDirectory, PluginError> {
        (self.0)()
    }
}

impl<F> HandoffHandler for FnPlugin<F>
where
    F: Fn(&Path) -> Result<(), PluginError> + Send + Sync,
{
    fn handoff(&self, output_dir: &Path) -> Result<(), PluginError> {
        (self.0)(output_dir)
    }
}

impl<F> AssetProcessor for FnPlugin<F>
where
    F: Fn(&[u8], &str) -> Result<AssetProcessorOutput, PluginError> + Send + Sync,
{
    fn process(
        &self,
        contents: &[u8],
        filename: &str,
    ) -> Result<AssetProcessorOutput, PluginError> {
        (self.0)(contents, filename)
    }
}

/// Anything a specifier can resolve to.
#[derive(Clone)]
pub enum Module {
    /// Plain data (config objects, context objects)
    Data(Value),
    SourceProcessor(Arc<dyn SourceProcessor>),
    MockGenerator(Arc<dyn MockGenerator>),
    HandoffHandler(Arc<dyn HandoffHandler>),
    AssetProcessor(Arc<dyn AssetProcessor>),
}

impl Module {
    /// Wrap a closure as a source processor module.
    pub fn source_processor<F>(f: F) -> Self
    where
        F: for<'a> Fn(SourceProcessorInput<'a>) -> Result<SourceProcessorOutput, PluginError>
            + Send
            + Sync
            + 'static,
    {
        Self::SourceProcessor(Arc::new(FnPlugin(f)))
    }

    /// Wrap a closure as a mock generator module.
    pub fn mock_generator<F>(f: F) -> Self
    where
        F: Fn() -> Result<MockDirectory, PluginError> + Send + Sync + 'static,
    {
        Self::MockGenerator(Arc::new(FnPlugin(f)))
    }

    /// Wrap a closure as a handoff handler module.
    pub fn handoff_handler<F>(f: F) -> Self
    where
        F: Fn(&Path) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self::HandoffHandler(Arc::new(FnPlugin(f)))
    }

    /// Wrap a closure as an asset processor module.
    pub fn asset_processor<F>(f: F) -> Self
    where
        F: Fn(&[u8], &str) -> Result<AssetProcessorOutput, PluginError> + Send + Sync + 'static,
    {
        Self::AssetProcessor(Arc::new(FnPlugin(f)))
    }

    /// Human-readable capability name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Module::Data(_) => "data object",
            Module::SourceProcessor(_) => "source processor",
            Module::MockGenerator(_) => "mock generator",
            Module::HandoffHandler(_) => "handoff handler",
            Module::AssetProcessor(_) => "asset processor",
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::Data(value) => f.debug_tuple("Data").field(value).finish(),
            other => write!(f, "Module({})", other.kind()),
        }
    }
}

impl From<Value> for Module {
    fn from(value: Value) -> Self {
        Module::Data(value)
    }
}
