
use nd::{Array, ArrayViewMut, Ix1, Ix2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::path::Path;

use na_core::{ForecastStep, Model, Operator};
use na_df::{ConfigError, FilterHistory, Observer};
use na_df::observation::{perturbed_observations, ObservationNetwork};
use na_df::utils::PerVariable;

use crate::{read_json, write_json, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservedVariable {
  pub name: String,
  /// Cells the measurements were taken on, for reference.
  #[serde(default)]
  pub cells: Vec<usize>,
  /// Entry `k` holds the measurement vector of cycle `k + 1`.
  pub measurements: Vec<Vec<f64>>,
}

/// Measurements per variable per cycle, as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservationTable {
  pub variables: Vec<ObservedVariable>,
}

impl ObservationTable {
  pub fn load(path: &Path) -> Result<ObservationTable> {
    let table: ObservationTable = read_json(path)?;
    debug!(path = %path.display(), variables = table.variables.len(),
           cycles = table.cycles(), "loaded observations");
    Ok(table)
  }
  pub fn save(&self, path: &Path) -> Result<()> {
    write_json(path, self)
  }

  /// Cycles every variable has measurements for.
  pub fn cycles(&self) -> u64 {
    self.variables
      .iter()
      .map(|v| v.measurements.len() as u64 )
      .min()
      .unwrap_or(0)
  }

  pub fn variable(&self, name: &str) -> Option<&ObservedVariable> {
    self.variables.iter().find(|v| v.name == name )
  }

  /// Puts the table in the filter's variable order so it can be indexed by
  /// variable number. Filter variables missing from the table get an empty
  /// entry; table variables the filter doesn't know are an error.
  pub fn arrange<S>(self, names: &[S]) -> Result<ObservationTable>
    where S: AsRef<str>,
  {
    if let Some(v) = self.variables
      .iter()
      .find(|v| !names.iter().any(|n| n.as_ref() == v.name ))
    {
      return Err(Error::UnknownVariable { name: v.name.clone(), });
    }

    let mut remaining = self.variables;
    let variables = names
      .iter()
      .map(|name| {
        let name = name.as_ref();
        match remaining.iter().position(|v| v.name == name ) {
          Some(idx) => remaining.swap_remove(idx),
          None => ObservedVariable {
            name: name.to_owned(),
            cells: Vec::new(),
            measurements: Vec::new(),
          },
        }
      })
      .collect();

    Ok(ObservationTable { variables, })
  }
}

impl Observer for ObservationTable {
  fn observe_into(&self, cycle: u64, variable: usize,
                  mut out: ArrayViewMut<f64, Ix1>) -> bool {
    let v = match self.variables.get(variable) {
      Some(v) => v,
      None => return false,
    };
    let row = match cycle.checked_sub(1).and_then(|k| v.measurements.get(k as usize) ) {
      Some(row) => row,
      None => return false,
    };
    if row.len() != out.len() {
      warn!(variable = %v.name, cycle, expected = out.len(), found = row.len(),
            "measurement vector has the wrong length");
      return false;
    }

    for (o, &m) in out.iter_mut().zip(row.iter()) {
      *o = m;
    }
    true
  }
}

/// Setup of a twin experiment: a single "true" run of the model, observed
/// through the same networks the filter will use.
#[derive(Debug, Clone)]
pub struct TwinConfig<'a> {
  pub names: Vec<String>,
  /// `variables x cells`
  pub initial_state: Array<f64, Ix2>,
  pub networks: &'a [ObservationNetwork],
  /// Percent of magnitude, as for the filter.
  pub measurement_noise: PerVariable<f64>,
  pub cycles: u64,
  pub solver_runs: u32,
  pub start_time: f64,
  pub time_step: f64,
}

#[derive(Debug, Clone)]
pub struct Twin {
  pub truth: FilterHistory,
  pub observations: ObservationTable,
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
  if expected == found {
    Ok(())
  } else {
    let e = ConfigError::PerVariableLength { what, expected, found, };
    Err(Error::Filter(e.into()))
  }
}

/// Runs the truth and records noisy measurements of it after every cycle.
pub fn generate_twin<M, R>(config: &TwinConfig, model: &M, rand: &mut R)
  -> Result<Twin>
  where M: Model,
        R: Rng + ?Sized,
{
  let vars = config.names.len();
  check_len("initial state rows", vars, config.initial_state.nrows())?;
  check_len("observation networks", vars, config.networks.len())?;
  if !config.measurement_noise.matches(vars) {
    check_len("measurement noise", vars, config.measurement_noise.entries())?;
  }

  let mut state = config.initial_state.clone();
  let mut truth = FilterHistory::new(config.names.iter().cloned());
  truth.push(state.rows().into_iter().map(|r| r.to_owned() ).collect());

  let mut observations = ObservationTable {
    variables: config.names
      .iter()
      .zip(config.networks.iter())
      .map(|(name, net)| ObservedVariable {
        name: name.clone(),
        cells: net.cells.clone(),
        measurements: Vec::with_capacity(config.cycles as usize),
      })
      .collect(),
  };

  let mut time = config.start_time;
  for cycle in 1..=config.cycles {
    for sub_step in 0..config.solver_runs {
      let step = ForecastStep {
        cycle,
        sub_step,
        time,
        dt: config.time_step,
      };
      model.run_model(&step, 0, state.view_mut())?;
      time = step.end_time();
    }
    truth.push(state.rows().into_iter().map(|r| r.to_owned() ).collect());

    for (i, (net, table)) in config.networks
      .iter()
      .zip(observations.variables.iter_mut())
      .enumerate()
    {
      let mut y = Array::zeros(net.len());
      net.measurement_operator.eval_at(state.row(i), y.view_mut())?;
      let y_pert = perturbed_observations(y.view(), 1,
                                          config.measurement_noise[i], rand)?;
      table.measurements.push(y_pert.column(0).to_vec());
    }
  }

  debug!(cycles = config.cycles, time, "generated twin experiment");
  Ok(Twin {
    truth,
    observations,
  })
}
