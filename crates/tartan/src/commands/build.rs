//! Project build command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tartan_markdown::{MarkdownProcessor, MARKDOWN};
use tartan_resolve::Module;
use tartan_static::{MinifyCss, Project, ProjectConfig, MINIFY_CSS};

/// Run the build command.
pub async fn run(config_file: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let working_dir = std::env::current_dir().context("Failed to read the current directory")?;

    let mut config = ProjectConfig::load(&working_dir, &config_file)?;
    tracing::info!("Loaded config from {}", config_file.display());
    if let Some(output) = output {
        config.output_dir = output;
    }

    let mut project = Project::new(config, &working_dir);
    register_builtins(&mut project);
    project.init().await?;

    tracing::info!("Building {}", project.config().root_dir.display());
    let result = project.build().await?;

    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}

/// Collaborators every project can name without registering them.
fn register_builtins(project: &mut Project) {
    project.register_module(
        MARKDOWN,
        Module::SourceProcessor(Arc::new(MarkdownProcessor::new())),
    );
    project.register_module(MINIFY_CSS, Module::AssetProcessor(Arc::new(MinifyCss)));
}
