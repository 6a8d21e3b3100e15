//! Resolution layer for tartan builds.
//!
//! Holds the context data model, the plugin interfaces, the layered
//! filesystem and the [`Resolver`] that ties them together.

pub mod context;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod meta;
pub mod module;
pub mod paths;
pub mod resolver;
pub mod template;

pub use context::{default_root_context, merge, ContextFile, ModeSpec, PageMode, ResolvedContext};
pub use error::{ContextError, PluginError, ResolveError};
pub use fs::{DirEntry, DiskStore, EntryKind, FsStore, LayeredFs, MemoryStore};
pub use meta::{SourceMeta, SourceType, SubSourceMeta};
pub use module::{
    AssetProcessor, AssetProcessorOutput, HandoffHandler, MockDirectory, MockGenerator, Module,
    SourceProcessor, SourceProcessorInput, SourceProcessorOutput,
};
pub use resolver::{Resolver, ResolverOptions, OBJECT_EXTENSIONS};
pub use template::Template;
