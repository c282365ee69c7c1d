mod cmd;
mod output;
mod targets;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devloop_lib::config::EngineConfig;

use crate::output::OutputFormat;

/// devloop - rebuild, redeploy, or live update containers as sources change
#[derive(Parser)]
#[command(name = "devloop")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Engine configuration file (JSON)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Watch a targets file and react to source changes
  Watch {
    /// Path to the targets file
    #[arg(default_value = "devloop.json")]
    targets: PathBuf,

    /// Run build cycles against in-process backends instead of only reporting changes
    #[arg(long)]
    dry_run: bool,
  },

  /// Derive the deterministic image tag for a content digest
  Tag {
    /// Digest such as sha256:11cd0b38bc3ceb95...
    digest: String,
  },

  /// Map changed files to container paths through sync rules
  Map {
    /// Sync rule as LOCAL:CONTAINER (repeatable)
    #[arg(short, long = "sync", value_name = "LOCAL:CONTAINER", required = true)]
    syncs: Vec<String>,

    /// Changed files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Print the order targets would be built in
  Order {
    /// Path to the targets file
    #[arg(default_value = "devloop.json")]
    targets: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Watch { targets, dry_run } => {
      let config = load_config(cli.config.as_deref())?;
      cmd::cmd_watch(&targets, &config, dry_run)
    }
    Commands::Tag { digest } => cmd::cmd_tag(&digest),
    Commands::Map { syncs, files, format } => cmd::cmd_map(&syncs, &files, format),
    Commands::Order { targets, format } => cmd::cmd_order(&targets, format),
  }
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
  match path {
    Some(path) => EngineConfig::load(path).with_context(|| format!("Failed to load config: {}", path.display())),
    None => Ok(EngineConfig::default()),
  }
}
