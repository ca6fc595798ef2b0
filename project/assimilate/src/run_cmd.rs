use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use na_core::{Cancellation, ModelStats};
use na_df::assimilate::assimilate;
use util::{save_history, CycleProgress, ObservationTable};

use crate::cli::RunArgs;
use crate::config::AssimilateConfig;
use crate::{build_model, seeded_rng};

/// Runs the filter and writes the mean history. A failed run still writes
/// the history up to the last completed cycle.
pub fn run(args: RunArgs) -> Result<()> {
  let config = AssimilateConfig::load(&args.config)?;
  let init = config.filter_init()?;

  let observations = args.observations
    .or_else(|| config.io.observations.clone() )
    .ok_or_else(|| anyhow!("no observation table: set [io].observations or use --observations") )?;
  let output = args.output
    .or_else(|| config.io.output.clone() )
    .ok_or_else(|| anyhow!("no output path: set [io].output or use --output") )?;

  let table = ObservationTable::load(&observations)
    .with_context(|| format!("failed to read observations {}", observations.display()) )?
    .arrange(&config.names())?;
  if table.cycles() < init.iterations {
    warn!(available = table.cycles(), iterations = init.iterations,
          "observation table is shorter than the run");
  }

  // never cancelled here; Ctrl-C terminates the process group
  let cancel = Cancellation::new();
  let model = build_model(&config, &init.coordinates, &cancel)?;
  let mut model = ModelStats::from(&*model);
  let mut rng = seeded_rng(args.seed.or(config.seed));
  let mut progress = CycleProgress::new(init.iterations, "assimilating");

  info!(members = init.ensemble_count, cells = init.cell_count(),
        variables = init.variables.len(), cycles = init.iterations,
        "starting assimilation");
  let result = assimilate(&init, &mut rng, &mut model, &table, &cancel,
                          |report| progress.on_cycle(report) );

  match result {
    Ok(history) => {
      save_history(&output, &history)
        .with_context(|| format!("failed to write history {}", output.display()) )?;
      info!(path = %output.display(), model_calls = model.calls, "history written");
      Ok(())
    },
    Err(failure) => {
      if !failure.history.is_empty() {
        match save_history(&output, &failure.history) {
          Ok(()) => warn!(path = %output.display(), columns = failure.history.len(),
                          "partial history written"),
          Err(e) => warn!(error = %e, "could not write the partial history"),
        }
      }
      Err(failure).context("assimilation failed")
    },
  }
}
