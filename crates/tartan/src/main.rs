//! Tartan CLI - builds a static site from a source tree of context files.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tartan_static::CONFIG_FILE;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "tartan")]
#[command(about = "Static content builder driven by per-directory context files")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log output (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project into its output directory
    Build {
        /// Path to the config file, without extension
        #[arg(long, default_value = CONFIG_FILE)]
        config_file: PathBuf,

        /// Output directory (overrides the config file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(cli.verbose)));

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Build {
            config_file,
            output,
        } => {
            commands::build::run(config_file, output).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_options() {
        let cli = Cli::try_parse_from([
            "tartan",
            "build",
            "-vv",
            "--config-file",
            "site/tartan.config",
            "-o",
            "public",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Build {
            config_file,
            output,
        } = cli.command;
        assert_eq!(config_file, PathBuf::from("site/tartan.config"));
        assert_eq!(output, Some(PathBuf::from("public")));
    }

    #[test]
    fn defaults_to_project_config() {
        let cli = Cli::try_parse_from(["tartan", "build"]).unwrap();
        assert_eq!(cli.verbose, 0);
        let Commands::Build { config_file, output } = cli.command;
        assert_eq!(config_file, PathBuf::from(CONFIG_FILE));
        assert_eq!(output, None);
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(log_level(0), "info");
        assert_eq!(log_level(1), "debug");
        assert_eq!(log_level(5), "trace");
    }
}
