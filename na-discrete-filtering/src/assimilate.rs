//! The time loop: cycles `1..=iterations` of forecast then analysis, with
//! the mean history kept across failures.

use nd::{Array, Ix1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use std::fmt;

use na_core::{Cancellation, Model, ModelStats};

use crate::{Algorithm, Observer, Workspace};
use crate::ensemble::EnsembleWorkspace;
use crate::error::Error;
use crate::history::FilterHistory;
use crate::kalman::enkf::{Algo, Init, OwnedWorkspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
  Initialized,
  Forecasting,
  Analyzing,
  Done,
}
impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let s = match *self {
      Phase::Initialized => "initializing",
      Phase::Forecasting => "forecasting",
      Phase::Analyzing => "analyzing",
      Phase::Done => "done",
    };
    f.write_str(s)
  }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
  pub cycle: u64,
  /// Simulation time after the forecast.
  pub time: f64,
  /// Cells whose local analysis was dropped as numerically unstable.
  pub skipped_cells: usize,
  /// Cells with no observation within the localization radius.
  pub empty_cells: usize,
  /// Ensemble mean per variable after the analysis.
  pub means: Vec<Array<f64, Ix1>>,
}

/// A run that stopped early. `history` holds the initial mean and every
/// cycle that completed before `cycle`.
#[derive(Debug, thiserror::Error)]
#[error("assimilation failed in cycle {cycle} while {phase}")]
pub struct RunFailure {
  pub cycle: u64,
  pub phase: Phase,
  #[source]
  pub source: Error,
  pub history: FilterHistory,
}

/// Drives `algo` for `iterations` cycles over an already allocated
/// workspace. `on_cycle` sees every completed cycle, after its mean was
/// recorded.
pub fn run<A, M, Ob, R, F>(algo: &A,
                           workspace: &mut A::WS,
                           iterations: u64,
                           rand: &mut R,
                           model: &mut ModelStats<M>,
                           observer: &Ob,
                           cancel: &Cancellation,
                           mut on_cycle: F)
  -> Result<FilterHistory, RunFailure>
  where A: Algorithm<M, Ob>,
        M: Model,
        Ob: Observer,
        R: Rng + ?Sized,
        F: FnMut(&CycleReport),
{
  let mut history = FilterHistory::new(workspace.ensemble().names());
  history.push(workspace.means());

  for cycle in 1..=iterations {
    match algo.next_step(cycle, iterations, rand, workspace, model,
                         observer, cancel) {
      Ok(report) => {
        history.push(report.means.clone());
        on_cycle(&report);
      },
      Err(source) => {
        let phase = source.phase();
        error!(cycle, %phase, error = %source, "assimilation stopped");
        return Err(RunFailure {
          cycle,
          phase,
          source,
          history,
        });
      },
    }
  }

  debug!(phase = %Phase::Done, cycles = iterations, model_calls = model.calls);
  info!(cycles = iterations, "assimilation finished");
  Ok(history)
}

/// Validates `init`, generates the initial ensemble and runs
/// `init.iterations` cycles of the localized EnKF.
pub fn assimilate<M, Ob, R, F>(init: &Init,
                               rand: &mut R,
                               model: &mut ModelStats<M>,
                               observer: &Ob,
                               cancel: &Cancellation,
                               on_cycle: F)
  -> Result<FilterHistory, RunFailure>
  where M: Model,
        Ob: Observer,
        R: Rng + ?Sized,
        F: FnMut(&CycleReport),
{
  let setup = match Algo::new(init) {
    Ok(algo) => OwnedWorkspace::alloc(init, &mut *rand).map(|ws| (algo, ws) ),
    Err(e) => Err(e),
  };
  let (algo, mut workspace) = match setup {
    Ok(v) => v,
    Err(source) => {
      error!(error = %source, "could not set up the filter");
      return Err(RunFailure {
        cycle: 0,
        phase: Phase::Initialized,
        source,
        history: FilterHistory::new(init.variables.iter().map(|v| v.name.clone() )),
      });
    },
  };

  run(&algo, &mut workspace, init.iterations, rand, model, observer,
      cancel, on_cycle)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ConfigError;

  #[test]
  fn phase_display() {
    assert_eq!(Phase::Forecasting.to_string(), "forecasting");
    assert_eq!(Phase::Done.to_string(), "done");
  }

  #[test]
  fn errors_map_to_phases() {
    let e = Error::Configuration(ConfigError::NoCells);
    assert_eq!(e.phase(), Phase::Initialized);
    assert_eq!(Error::Cancelled { cycle: 2 }.phase(), Phase::Forecasting);
    assert_eq!(Error::MissingObservation { cycle: 2, variable: 0 }.phase(),
               Phase::Analyzing);
  }
}
