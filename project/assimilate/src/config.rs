use anyhow::{bail, Context, Result};
use nd::{Array, Ix1, Ix2};
use serde::Deserialize;

use std::fs;
use std::path::{Path, PathBuf};

use na_df::ensemble::Boundary;
use na_df::forcing::NegativePolicy;
use na_df::kalman::enkf::{Init, InstabilityPolicy, NoiseLevels, VariableInit};
use na_df::kalman::gain::GainAssemblyKind;
use na_df::observation::ObservationNetwork;
use na_df::utils::PerVariable;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssimilateConfig {
  /// Global RNG seed.
  #[serde(default)]
  pub seed: Option<u64>,
  pub filter: FilterToml,
  #[serde(default)]
  pub noise: NoiseToml,
  pub grid: GridToml,
  #[serde(rename = "variable")]
  pub variables: Vec<VariableToml>,
  pub model: ModelToml,
  #[serde(default)]
  pub io: IoToml,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterToml {
  pub ensemble_count: usize,
  pub localization_radius: f64,
  pub iterations: u64,
  #[serde(default = "default_solver_runs")]
  pub solver_runs: u32,
  pub time_step: f64,
  #[serde(default)]
  pub start_time: f64,
  #[serde(default)]
  pub negative_policy: NegativePolicy,
  #[serde(default)]
  pub instability_policy: InstabilityPolicy,
  #[serde(default)]
  pub gain_assembly: GainAssemblyKind,
}

fn default_solver_runs() -> u32 {
  1
}

/// A value given once for every variable, or once per variable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(f64),
  Many(Vec<f64>),
}
impl OneOrMany {
  pub fn per_variable(&self) -> PerVariable<f64> {
    match self {
      &OneOrMany::One(v) => PerVariable::Single(v),
      &OneOrMany::Many(ref v) => PerVariable::Multiple(v.clone()),
    }
  }

  /// Expands to exactly `n` values.
  fn expand(&self, what: &str, n: usize) -> Result<Vec<f64>> {
    match self {
      &OneOrMany::One(v) => Ok(vec![v; n]),
      &OneOrMany::Many(ref v) if v.len() == n => Ok(v.clone()),
      &OneOrMany::Many(ref v) => {
        bail!("{} has {} values, expected {}", what, v.len(), n)
      },
    }
  }
}

/// Standard deviations in percent of magnitude.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoiseToml {
  #[serde(default = "zero")]
  pub sample: OneOrMany,
  #[serde(default = "zero")]
  pub process: OneOrMany,
  #[serde(default = "zero")]
  pub measurement: OneOrMany,
  #[serde(default = "default_reference_magnitude")]
  pub reference_magnitude: f64,
}
impl Default for NoiseToml {
  fn default() -> NoiseToml {
    NoiseToml {
      sample: zero(),
      process: zero(),
      measurement: zero(),
      reference_magnitude: default_reference_magnitude(),
    }
  }
}

fn zero() -> OneOrMany {
  OneOrMany::One(0.0)
}
fn default_reference_magnitude() -> f64 {
  1.0
}

/// Either explicit cell coordinates or a uniform grid of `cells` cell
/// centres over `[0, length]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridToml {
  #[serde(default)]
  pub coordinates: Option<Vec<f64>>,
  #[serde(default)]
  pub cells: Option<usize>,
  #[serde(default)]
  pub length: Option<f64>,
}

impl GridToml {
  pub fn coordinates(&self) -> Result<Array<f64, Ix1>> {
    match (&self.coordinates, self.cells, self.length) {
      (&Some(ref c), None, None) => Ok(Array::from(c.clone())),
      (&None, Some(cells), Some(length)) => {
        if cells == 0 || !(length.is_finite() && length > 0.0) {
          bail!("[grid] needs cells > 0 and a positive length");
        }
        let h = length / cells as f64;
        Ok(Array::from_shape_fn(cells, |i| (i as f64 + 0.5) * h ))
      },
      _ => bail!("[grid] takes either `coordinates` or both `cells` and `length`"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryToml {
  pub cells: Vec<usize>,
  pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableToml {
  pub name: String,
  /// Base state, uniform or per cell.
  pub initial: OneOrMany,
  #[serde(default)]
  pub boundary: Option<BoundaryToml>,
  #[serde(default)]
  pub observation_cells: Vec<usize>,
  /// Observation-error variance, uniform or per observation.
  #[serde(default = "unit_variance")]
  pub observation_variance: OneOrMany,
}

fn unit_variance() -> OneOrMany {
  OneOrMany::One(1.0)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ModelToml {
  /// The built-in 1-D heat equation.
  Heat { diffusivity: f64 },
  /// A CFD solver run once per member per sub-step.
  External {
    command: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    /// Written as `application` into controlDict; defaults to the command's
    /// file name.
    #[serde(default)]
    application: Option<String>,
    #[serde(default)]
    case_template: Option<PathBuf>,
    work_dir: PathBuf,
  },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoToml {
  pub observations: Option<PathBuf>,
  pub output: Option<PathBuf>,
}

impl AssimilateConfig {
  pub fn load(path: &Path) -> Result<AssimilateConfig> {
    let text = fs::read_to_string(path)
      .with_context(|| format!("failed to read config {}", path.display()) )?;
    let mut config: AssimilateConfig = toml::from_str(&text)
      .with_context(|| format!("failed to parse config {}", path.display()) )?;
    config.resolve_paths(path.parent().unwrap_or_else(|| Path::new("") ));
    Ok(config)
  }

  /// Makes relative paths relative to the config file's directory.
  fn resolve_paths(&mut self, base: &Path) {
    let resolve = |p: &mut PathBuf| {
      if p.is_relative() {
        *p = base.join(&*p);
      }
    };
    if let Some(ref mut p) = self.io.observations { resolve(p); }
    if let Some(ref mut p) = self.io.output { resolve(p); }
    if let ModelToml::External { ref mut case_template, ref mut work_dir, .. } = self.model {
      if let Some(ref mut p) = *case_template { resolve(p); }
      resolve(work_dir);
    }
  }

  pub fn names(&self) -> Vec<String> {
    self.variables.iter().map(|v| v.name.clone() ).collect()
  }

  /// `variables x cells` base state.
  pub fn initial_state(&self, cells: usize) -> Result<Array<f64, Ix2>> {
    let mut state = Array::zeros((self.variables.len(), cells));
    for (mut row, v) in state.rows_mut().into_iter().zip(self.variables.iter()) {
      let values = v.initial.expand(&format!("`{}` initial state", v.name), cells)?;
      for (dst, x) in row.iter_mut().zip(values.into_iter()) {
        *dst = x;
      }
    }
    Ok(state)
  }

  pub fn networks(&self, cells: usize) -> Result<Vec<ObservationNetwork>> {
    self.variables
      .iter()
      .map(|v| {
        let what = format!("`{}` observation variance", v.name);
        let variances = v.observation_variance.expand(&what, v.observation_cells.len())?;
        Ok(ObservationNetwork::point(v.observation_cells.clone(), cells,
                                     Array::from(variances).view()))
      })
      .collect()
  }

  pub fn noise(&self) -> NoiseLevels {
    NoiseLevels {
      sample: self.noise.sample.per_variable(),
      process: self.noise.process.per_variable(),
      measurement: self.noise.measurement.per_variable(),
      reference_magnitude: self.noise.reference_magnitude,
    }
  }

  /// The filter setup. Range checks are left to `Init::validate`.
  pub fn filter_init(&self) -> Result<Init> {
    let coordinates = self.grid.coordinates()?;
    let cells = coordinates.len();
    let state = self.initial_state(cells)?;
    let networks = self.networks(cells)?;

    let variables = self.variables
      .iter()
      .zip(state.rows())
      .zip(networks.into_iter())
      .map(|((v, initial), observations)| VariableInit {
        name: v.name.clone(),
        initial_state: initial.to_owned(),
        observations,
        boundary: v.boundary
          .as_ref()
          .map(|b| Boundary::new(b.cells.clone(), b.value) ),
      })
      .collect();

    let f = &self.filter;
    Ok(Init {
      ensemble_count: f.ensemble_count,
      coordinates,
      localization_radius: f.localization_radius,
      solver_runs: f.solver_runs,
      time_step: f.time_step,
      start_time: f.start_time,
      iterations: f.iterations,
      noise: self.noise(),
      negative_policy: f.negative_policy,
      instability_policy: f.instability_policy,
      gain_assembly: f.gain_assembly,
      variables,
    })
  }
}
