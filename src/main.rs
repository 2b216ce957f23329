use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use centime::commands::{self, Command};
use centime::config::Config;

#[derive(Parser, Debug)]
#[command(name = "centime")]
#[command(about = "Offline-first personal finance tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/centime/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Owner id to operate as (overrides the config file)
  #[arg(long)]
  owner: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("centime=warn")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override owner if specified on command line
  let config = if let Some(owner) = args.owner {
    Config {
      owner_id: owner,
      ..config
    }
  } else {
    config
  };

  commands::run(&config, args.command).await
}
