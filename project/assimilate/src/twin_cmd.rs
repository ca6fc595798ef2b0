use anyhow::{anyhow, Context, Result};
use tracing::info;

use na_core::{Cancellation, Model};
use util::{generate_twin, save_history, TwinConfig};

use crate::cli::TwinArgs;
use crate::config::AssimilateConfig;
use crate::{build_model, seeded_rng};

/// Runs the configured model once from the configured initial state and
/// writes noisy measurements of it through the configured networks.
pub fn run(args: TwinArgs) -> Result<()> {
  let config = AssimilateConfig::load(&args.config)?;
  let coordinates = config.grid.coordinates()?;
  let cells = coordinates.len();
  let networks = config.networks(cells)?;

  let output = args.output
    .or_else(|| config.io.observations.clone() )
    .ok_or_else(|| anyhow!("no output path: set [io].observations or use --output") )?;

  let twin_config = TwinConfig {
    names: config.names(),
    initial_state: config.initial_state(cells)?,
    networks: &networks,
    measurement_noise: config.noise().measurement,
    cycles: config.filter.iterations,
    solver_runs: config.filter.solver_runs,
    start_time: config.filter.start_time,
    time_step: config.filter.time_step,
  };

  let cancel = Cancellation::new();
  let model = build_model(&config, &coordinates, &cancel)?;
  let model: &dyn Model = &*model;
  let mut rng = seeded_rng(args.seed.or(config.seed));

  let twin = generate_twin(&twin_config, &model, &mut rng)
    .context("twin experiment failed")?;

  twin.observations.save(&output)
    .with_context(|| format!("failed to write observations {}", output.display()) )?;
  info!(path = %output.display(), cycles = twin.observations.cycles(),
        "observations written");

  if let Some(ref path) = args.truth {
    save_history(path, &twin.truth)
      .with_context(|| format!("failed to write truth {}", path.display()) )?;
    info!(path = %path.display(), "truth written");
  }
  Ok(())
}
