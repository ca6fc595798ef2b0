use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Localized ensemble Kalman filtering around a CFD solver.
#[derive(Parser)]
#[command(name = "assimilate", version,
          about = "Localized ensemble Kalman filter for gridded solver states")]
pub struct Cli {
  /// Increase verbosity (-v info, -vv debug, -vvv trace).
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  pub verbose: u8,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
  /// Run the filter against an observation table.
  Run(RunArgs),
  /// Generate a truth run and synthetic observations of it.
  Twin(TwinArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
  /// Path to TOML configuration file.
  #[arg(short, long, default_value = "assimilate.toml")]
  pub config: PathBuf,

  /// Override the history output path from config.
  #[arg(short, long)]
  pub output: Option<PathBuf>,

  /// Override the RNG seed from config.
  #[arg(short, long)]
  pub seed: Option<u64>,

  /// Observation table, overriding `[io].observations`.
  #[arg(long)]
  pub observations: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct TwinArgs {
  /// Path to TOML configuration file.
  #[arg(short, long, default_value = "assimilate.toml")]
  pub config: PathBuf,

  /// Where to write the synthetic observation table. Defaults to
  /// `[io].observations`.
  #[arg(short, long)]
  pub output: Option<PathBuf>,

  /// Also write the true trajectory here.
  #[arg(long)]
  pub truth: Option<PathBuf>,

  #[arg(short, long)]
  pub seed: Option<u64>,
}
