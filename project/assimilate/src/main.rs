extern crate anyhow;
extern crate clap;
extern crate ndarray as nd;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate rand;
extern crate serde;
extern crate thiserror;
extern crate toml;
extern crate tracing;
extern crate tracing_subscriber;
extern crate util;

mod cli;
mod config;
mod fields;
mod heat;
mod logging;
mod run_cmd;
mod solver;
mod twin_cmd;

use anyhow::{Context, Result};
use clap::Parser;
use nd::{Array, Ix1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use std::process;

use na_core::{Cancellation, Model};

use crate::cli::{Cli, Command};
use crate::config::{AssimilateConfig, ModelToml};

fn main() {
  let cli = Cli::parse();
  logging::init(cli.verbose);

  if let Err(e) = run(cli.command) {
    eprintln!("Error: {:#}", e);
    process::exit(1);
  }
}

fn run(command: Command) -> Result<()> {
  match command {
    Command::Run(args) => run_cmd::run(args),
    Command::Twin(args) => twin_cmd::run(args),
  }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
  match seed {
    Some(s) => {
      info!(seed = s, "seeding RNG");
      StdRng::seed_from_u64(s)
    },
    None => StdRng::from_entropy(),
  }
}

/// The forecast operator named in `[model]`.
fn build_model(config: &AssimilateConfig, coordinates: &Array<f64, Ix1>,
               cancel: &Cancellation) -> Result<Box<dyn Model>> {
  match config.model {
    ModelToml::Heat { diffusivity } => {
      let model = heat::HeatModel::new(coordinates.clone(), diffusivity)
        .context("invalid [model] section")?;
      info!(diffusivity, cells = coordinates.len(), "using the built-in heat model");
      Ok(Box::new(model))
    },
    ModelToml::External {
      ref command,
      ref args,
      ref application,
      ref case_template,
      ref work_dir,
    } => {
      let application = match application {
        &Some(ref a) => a.clone(),
        &None => command
          .file_name()
          .map(|n| n.to_string_lossy().into_owned() )
          .unwrap_or_default(),
      };
      let model = solver::ExternalSolver::new(command.clone(), args.clone(),
                                              application,
                                              case_template.clone(),
                                              work_dir.clone(),
                                              config.names(),
                                              cancel.clone())
        .with_context(|| format!("failed to prepare solver work dir {}",
                                 work_dir.display()) )?;
      info!(command = %command.display(), work_dir = %work_dir.display(),
            "using an external solver");
      Ok(Box::new(model))
    },
  }
}
