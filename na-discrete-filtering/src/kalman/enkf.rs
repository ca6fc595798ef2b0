//! Stochastic EnKF with per-cell localization.
//!
//! Every cycle runs `solver_runs` forecast sub-steps on the whole ensemble,
//! then, per variable, one small Kalman update per cell using only the
//! observations within `localization_radius` of it. The local corrections are
//! merged by a `GainAssembly` and added to the forecast.

use nd::{Array, Axis, Ix1, Ix2};
use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use std::collections::HashSet;

use na_core::{Cancellation, ForecastStep, Model, ModelStats};

use crate::{Algorithm, Initializer, Observer, Workspace};
use crate::assimilate::CycleReport;
use crate::ensemble::{generate_ensemble, Boundary, Ensemble, EnsemblePredict,
                      EnsembleWorkspace, StateVariable};
use crate::error::{ConfigError, Error, Result};
use crate::forcing::{NegativePolicy, Perturbation};
use crate::localization::Localizer;
use crate::observation::{perturbed_observations, ObservationNetwork};
use crate::utils::{submatrix, PerVariable};

use super::gain::{GainAssembly, GainAssemblyKind, LocalCorrection};
use super::local_analysis;

#[derive(Debug, Clone)]
pub struct VariableInit {
  pub name: String,
  /// Base state the ensemble is spread around, one entry per cell.
  pub initial_state: Array<f64, Ix1>,
  pub observations: ObservationNetwork,
  pub boundary: Option<Boundary>,
}

/// Standard deviations in percent of magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseLevels {
  /// Spread of the initial ensemble.
  pub sample: PerVariable<f64>,
  /// Added to every member before each forecast sub-step.
  pub process: PerVariable<f64>,
  /// Perturbation of the measurements, once per cycle.
  pub measurement: PerVariable<f64>,
  /// Magnitude used for cells whose value is exactly zero.
  pub reference_magnitude: f64,
}
impl Default for NoiseLevels {
  fn default() -> NoiseLevels {
    NoiseLevels {
      sample: PerVariable::Single(0.0),
      process: PerVariable::Single(0.0),
      measurement: PerVariable::Single(0.0),
      reference_magnitude: 1.0,
    }
  }
}

/// What a failed local gain solve does to the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstabilityPolicy {
  /// Zero correction for the cell, logged and counted.
  SkipCell,
  Abort,
}
impl Default for InstabilityPolicy {
  fn default() -> InstabilityPolicy { InstabilityPolicy::Abort }
}

#[derive(Debug, Clone)]
pub struct Init {
  pub ensemble_count: usize,
  /// One coordinate per cell.
  pub coordinates: Array<f64, Ix1>,
  pub localization_radius: f64,
  /// Forecast sub-steps per assimilation cycle.
  pub solver_runs: u32,
  pub time_step: f64,
  pub start_time: f64,
  pub iterations: u64,
  pub noise: NoiseLevels,
  pub negative_policy: NegativePolicy,
  pub instability_policy: InstabilityPolicy,
  pub gain_assembly: GainAssemblyKind,
  pub variables: Vec<VariableInit>,
}
impl Initializer for Init { }

fn check_parameter(what: &str, value: f64)
  -> ::std::result::Result<(), ConfigError>
{
  if value.is_finite() && value >= 0.0 {
    Ok(())
  } else {
    Err(ConfigError::InvalidParameter {
      what: what.into(),
      value,
    })
  }
}

fn check_per_variable(what: &'static str, levels: &PerVariable<f64>,
                      variables: usize)
  -> ::std::result::Result<(), ConfigError>
{
  if !levels.matches(variables) {
    return Err(ConfigError::PerVariableLength {
      what,
      expected: variables,
      found: levels.entries(),
    });
  }
  for &v in levels.iter() {
    check_parameter(what, v)?;
  }
  Ok(())
}

impl Init {
  pub fn cell_count(&self) -> usize { self.coordinates.len() }

  /// Checks everything that can be checked before the first forecast.
  pub fn validate(&self) -> ::std::result::Result<(), ConfigError> {
    if self.ensemble_count < 2 {
      return Err(ConfigError::EnsembleSize { count: self.ensemble_count, });
    }
    let cells = self.cell_count();
    if cells == 0 {
      return Err(ConfigError::NoCells);
    }
    if let Some(&x) = self.coordinates.iter().find(|x| !x.is_finite() ) {
      return Err(ConfigError::InvalidParameter {
        what: "cell coordinate".into(),
        value: x,
      });
    }
    if self.variables.is_empty() {
      return Err(ConfigError::NoVariables);
    }
    if self.solver_runs == 0 {
      return Err(ConfigError::NoSolverRuns);
    }

    check_parameter("localization radius", self.localization_radius)?;
    check_parameter("time step", self.time_step)?;
    if !self.start_time.is_finite() {
      return Err(ConfigError::InvalidParameter {
        what: "start time".into(),
        value: self.start_time,
      });
    }

    let vars = self.variables.len();
    check_per_variable("sample noise", &self.noise.sample, vars)?;
    check_per_variable("process noise", &self.noise.process, vars)?;
    check_per_variable("measurement noise", &self.noise.measurement, vars)?;
    check_parameter("reference magnitude", self.noise.reference_magnitude)?;

    let mut seen = HashSet::new();
    for v in self.variables.iter() {
      if !seen.insert(v.name.as_str()) {
        return Err(ConfigError::DuplicateVariable { name: v.name.clone(), });
      }
      if v.initial_state.len() != cells {
        return Err(ConfigError::StateLength {
          variable: v.name.clone(),
          expected: cells,
          found: v.initial_state.len(),
        });
      }
      if let Some(&x) = v.initial_state.iter().find(|x| !x.is_finite() ) {
        return Err(ConfigError::InvalidParameter {
          what: format!("`{}` initial state", v.name),
          value: x,
        });
      }
      v.observations.validate(&v.name, cells)?;
      if let Some(ref b) = v.boundary {
        if let Some(&cell) = b.cells.iter().find(|&&c| c >= cells ) {
          return Err(ConfigError::BoundaryCell {
            variable: v.name.clone(),
            cell,
            cells,
          });
        }
        if !b.value.is_finite() {
          return Err(ConfigError::InvalidParameter {
            what: format!("`{}` boundary value", v.name),
            value: b.value,
          });
        }
      }
    }

    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct OwnedWorkspace {
  ensemble: Ensemble,
  /// Simulation time the ensemble is valid at.
  time: f64,
}

impl OwnedWorkspace {
  /// Starts from a caller-provided ensemble instead of a generated one,
  /// e.g. one restored from an earlier run.
  pub fn from_ensemble(i: &Init, ensemble: Ensemble) -> Result<OwnedWorkspace> {
    i.validate()?;
    if ensemble.variable_count() != i.variables.len() {
      return Err(ConfigError::PerVariableLength {
        what: "ensemble variables",
        expected: i.variables.len(),
        found: ensemble.variable_count(),
      }.into());
    }
    let expected = (i.cell_count(), i.ensemble_count);
    let found = (ensemble.cell_count(), ensemble.ensemble_count());
    if expected != found {
      return Err(ConfigError::EnsembleShape { expected, found, }.into());
    }

    let mut ensemble = ensemble;
    ensemble.enforce_boundaries();
    Ok(OwnedWorkspace {
      ensemble,
      time: i.start_time,
    })
  }

  pub fn time(&self) -> f64 { self.time }
}

impl Workspace<Init> for OwnedWorkspace {
  fn alloc<R>(i: &Init, rand: &mut R) -> Result<OwnedWorkspace>
    where R: Rng + ?Sized,
  {
    i.validate()?;

    let mut variables = Vec::with_capacity(i.variables.len());
    for (idx, v) in i.variables.iter().enumerate() {
      let perturbation = Perturbation::new(i.noise.sample[idx])
        .with_reference_magnitude(i.noise.reference_magnitude)
        .with_negative_policy(i.negative_policy);
      let members = generate_ensemble(v.initial_state.view(),
                                      i.ensemble_count,
                                      &perturbation,
                                      v.boundary.as_ref(),
                                      rand)?;
      variables.push(StateVariable {
        name: v.name.clone(),
        members,
        boundary: v.boundary.clone(),
      });
    }

    debug!(members = i.ensemble_count, cells = i.cell_count(),
           variables = variables.len(), "generated initial ensemble");

    Ok(OwnedWorkspace {
      ensemble: Ensemble::new(variables)?,
      time: i.start_time,
    })
  }
}
impl EnsembleWorkspace for OwnedWorkspace {
  fn ensemble(&self) -> &Ensemble { &self.ensemble }
}
impl EnsemblePredict for OwnedWorkspace {
  fn predict_ensemble(&mut self) -> &mut Ensemble { &mut self.ensemble }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct AnalysisCounts {
  skipped: usize,
  empty: usize,
}

#[derive(Debug)]
pub struct Algo {
  coordinates: Array<f64, Ix1>,
  radius: f64,
  solver_runs: u32,
  time_step: f64,
  process_noise: PerVariable<f64>,
  measurement_noise: PerVariable<f64>,
  reference_magnitude: f64,
  negative_policy: NegativePolicy,
  instability_policy: InstabilityPolicy,
  networks: Vec<ObservationNetwork>,
  names: Vec<String>,
  gain: Box<dyn GainAssembly>,
}

impl Algo {
  pub fn new(i: &Init) -> Result<Algo> {
    i.validate()?;
    Ok(Algo {
      coordinates: i.coordinates.clone(),
      radius: i.localization_radius,
      solver_runs: i.solver_runs,
      time_step: i.time_step,
      process_noise: i.noise.process.clone(),
      measurement_noise: i.noise.measurement.clone(),
      reference_magnitude: i.noise.reference_magnitude,
      negative_policy: i.negative_policy,
      instability_policy: i.instability_policy,
      networks: i.variables.iter().map(|v| v.observations.clone() ).collect(),
      names: i.variables.iter().map(|v| v.name.clone() ).collect(),
      gain: i.gain_assembly.build(),
    })
  }

  pub fn gain_assembly(&self) -> &dyn GainAssembly { &*self.gain }
  pub fn set_gain_assembly(&mut self, gain: Box<dyn GainAssembly>) {
    self.gain = gain;
  }

  pub fn process_noise(&self) -> &PerVariable<f64> { &self.process_noise }
  /// Takes effect from the next forecast sub-step on.
  pub fn set_process_noise(&mut self, noise: PerVariable<f64>)
    -> ::std::result::Result<(), ConfigError>
  {
    check_per_variable("process noise", &noise, self.names.len())?;
    self.process_noise = noise;
    Ok(())
  }

  pub fn instability_policy(&self) -> InstabilityPolicy { self.instability_policy }
  pub fn set_instability_policy(&mut self, policy: InstabilityPolicy) {
    self.instability_policy = policy;
  }

  fn forecast<M, R>(&self, cycle: u64, rand: &mut R,
                    workspace: &mut OwnedWorkspace,
                    model: &mut ModelStats<M>,
                    cancel: &Cancellation) -> Result<()>
    where M: Model,
          R: Rng + ?Sized,
  {
    for sub_step in 0..self.solver_runs {
      if cancel.is_cancelled() {
        return Err(Error::Cancelled { cycle });
      }

      for i in 0..self.names.len() {
        let noise = Perturbation::new(self.process_noise[i])
          .with_reference_magnitude(self.reference_magnitude)
          .with_negative_policy(self.negative_policy);
        if !noise.is_zero() {
          workspace.ensemble.perturb(i, &noise, rand)?;
        }
      }

      let step = ForecastStep {
        cycle,
        sub_step,
        time: workspace.time,
        dt: self.time_step,
      };
      trace!(cycle, sub_step, time = step.time, "forecast sub-step");
      workspace.ensemble_predict(&step, model, cancel)?;
      workspace.time = step.end_time();
    }
    Ok(())
  }

  /// One local analysis: `K innov` on the cells the observations near `cell`
  /// constrain.
  fn local_update(&self, variable: usize, cell: usize,
                  localizer: &Localizer,
                  members: &Array<f64, Ix2>,
                  y_pert: &Array<f64, Ix2>) -> Result<LocalCorrection> {
    let network = &self.networks[variable];
    let set = localizer.localize(variable, cell, network)?;

    let x_local = members.select(Axis(0), &set.cell_id);
    let h = submatrix(&network.linearized_operator, &set.obs_id, &set.cell_id);
    let c = submatrix(&network.measurement_operator, &set.obs_id, &set.cell_id);
    let y = y_pert.select(Axis(0), &set.obs_id);

    let values = local_analysis(x_local.view(), h.view(),
                                set.l_matrix.view(), c.view(), y.view())
      .map_err(|source| Error::NumericalInstability {
        variable,
        cell,
        source,
      })?;

    Ok(LocalCorrection {
      target: cell,
      cells: set.cell_id,
      values,
    })
  }

  fn analyze_variable<R, Ob>(&self, cycle: u64, variable: usize, rand: &mut R,
                             workspace: &mut OwnedWorkspace,
                             observer: &Ob) -> Result<AnalysisCounts>
    where R: Rng + ?Sized,
          Ob: Observer,
  {
    let network = &self.networks[variable];
    let name = &self.names[variable];
    let cells = workspace.ensemble.cell_count();
    let mut counts = AnalysisCounts::default();

    if network.is_empty() {
      trace!(variable = %name, "unobserved, no analysis");
      counts.empty = cells;
      return Ok(counts);
    }

    let mut y = Array::zeros(network.len());
    if !observer.observe_into(cycle, variable, y.view_mut()) {
      return Err(Error::MissingObservation { cycle, variable, });
    }
    let y_pert = perturbed_observations(y.view(),
                                        workspace.ensemble.ensemble_count(),
                                        self.measurement_noise[variable],
                                        rand)?;

    let phi = {
      let members = &workspace.ensemble.variable(variable).members;
      let localizer = Localizer::new(self.coordinates.view(), self.radius);

      let outcomes: Vec<Result<LocalCorrection>> = (0..cells)
        .into_par_iter()
        .map(|cell| self.local_update(variable, cell, &localizer, members, &y_pert) )
        .collect();

      let mut corrections = Vec::with_capacity(cells);
      for outcome in outcomes.into_iter() {
        match outcome {
          Ok(c) => corrections.push(c),
          Err(Error::LocalizationEmpty { cell, .. }) => {
            trace!(variable = %name, cell, "no observation in reach");
            counts.empty += 1;
          },
          Err(Error::NumericalInstability { variable, cell, source }) => {
            match self.instability_policy {
              InstabilityPolicy::SkipCell => {
                warn!(variable = %name, cycle, cell, error = %source,
                      "unstable local gain, skipping cell");
                counts.skipped += 1;
              },
              InstabilityPolicy::Abort => {
                return Err(Error::NumericalInstability { variable, cell, source, });
              },
            }
          },
          Err(e) => return Err(e),
        }
      }

      let mut phi = Array::zeros(members.dim());
      self.gain.assemble(&corrections, phi.view_mut());
      phi
    };

    let v = workspace.ensemble.variable_mut(variable);
    v.members += &phi;
    v.enforce_boundary();

    Ok(counts)
  }
}

impl<M, Ob> Algorithm<M, Ob> for Algo
  where M: Model,
        Ob: Observer,
{
  type Init = Init;
  type WS = OwnedWorkspace;

  fn init(i: &Init) -> Result<Algo> { Algo::new(i) }

  fn next_step<R>(&self,
                  cycle: u64,
                  total_cycles: u64,
                  rand: &mut R,
                  workspace: &mut OwnedWorkspace,
                  model: &mut ModelStats<M>,
                  observer: &Ob,
                  cancel: &Cancellation)
                  -> Result<CycleReport>
    where R: Rng + ?Sized,
  {
    if cancel.is_cancelled() {
      return Err(Error::Cancelled { cycle });
    }

    debug!(cycle, total_cycles, time = workspace.time, "forecasting");
    self.forecast(cycle, rand, workspace, model, cancel)?;

    debug!(cycle, gain = self.gain.name(), "analyzing");
    let mut skipped_cells = 0;
    let mut empty_cells = 0;
    for variable in 0..self.names.len() {
      let counts = self.analyze_variable(cycle, variable, rand,
                                         workspace, observer)?;
      skipped_cells += counts.skipped;
      empty_cells += counts.empty;
    }

    let report = CycleReport {
      cycle,
      time: workspace.time,
      skipped_cells,
      empty_cells,
      means: workspace.means(),
    };
    info!(cycle, total_cycles, time = report.time, skipped_cells,
          model_calls = model.calls, "cycle done");
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr1, arr2, ArrayViewMut};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  use std::sync::{Arc, Mutex};

  use crate::SimpleObserver;

  struct Persistence;
  impl Model for Persistence {
    fn run_model(&self, _step: &ForecastStep, _member: usize,
                 _state: ArrayViewMut<f64, Ix2>) -> na_core::Result<()> {
      Ok(())
    }
  }

  fn init() -> Init {
    let variable = VariableInit {
      name: "T".into(),
      initial_state: Array::from_elem(5, 300.0),
      observations: ObservationNetwork::point(vec![2], 5, arr1(&[1.0]).view()),
      boundary: Some(Boundary::new(vec![0, 4], 300.0)),
    };
    Init {
      ensemble_count: 3,
      coordinates: arr1(&[0.0, 0.1, 0.2, 0.3, 0.4]),
      localization_radius: 0.1,
      solver_runs: 1,
      time_step: 1.0,
      start_time: 0.0,
      iterations: 1,
      noise: NoiseLevels::default(),
      negative_policy: NegativePolicy::Resample,
      instability_policy: InstabilityPolicy::Abort,
      gain_assembly: GainAssemblyKind::Summed,
      variables: vec![variable],
    }
  }

  #[test]
  fn validate_accepts_the_reference_setup() {
    assert_eq!(init().validate(), Ok(()));
  }

  #[test]
  fn validate_rejects_small_ensembles() {
    let mut i = init();
    i.ensemble_count = 1;
    assert_eq!(i.validate(), Err(ConfigError::EnsembleSize { count: 1 }));
  }

  #[test]
  fn validate_rejects_bad_radius_and_noise() {
    let mut i = init();
    i.localization_radius = -0.5;
    assert!(matches!(i.validate(), Err(ConfigError::InvalidParameter { .. })));

    let mut i = init();
    i.localization_radius = ::std::f64::INFINITY;
    assert!(matches!(i.validate(), Err(ConfigError::InvalidParameter { .. })));

    let mut i = init();
    i.noise.process = PerVariable::Multiple(vec![1.0, 2.0]);
    assert_eq!(i.validate(),
               Err(ConfigError::PerVariableLength {
                 what: "process noise",
                 expected: 1,
                 found: 2,
               }));
  }

  #[test]
  fn validate_rejects_inconsistent_variables() {
    let mut i = init();
    let dup = i.variables[0].clone();
    i.variables.push(dup);
    assert_eq!(i.validate(), Err(ConfigError::DuplicateVariable { name: "T".into() }));

    let mut i = init();
    i.variables[0].initial_state = Array::zeros(4);
    assert_eq!(i.validate(),
               Err(ConfigError::StateLength { variable: "T".into(), expected: 5, found: 4 }));

    let mut i = init();
    i.variables[0].boundary = Some(Boundary::new(vec![5], 300.0));
    assert!(matches!(i.validate(), Err(ConfigError::BoundaryCell { cell: 5, .. })));

    let mut i = init();
    i.solver_runs = 0;
    assert_eq!(i.validate(), Err(ConfigError::NoSolverRuns));

    let mut i = init();
    i.coordinates = Array::zeros(0);
    assert_eq!(i.validate(), Err(ConfigError::NoCells));
  }

  #[test]
  fn alloc_refuses_invalid_configuration() {
    let mut i = init();
    i.variables.clear();
    let mut rng = StdRng::seed_from_u64(0);
    let err = OwnedWorkspace::alloc(&i, &mut rng).unwrap_err();
    assert!(matches!(err, Error::Configuration(ConfigError::NoVariables)));
  }

  #[test]
  fn from_ensemble_checks_shape() {
    let i = init();
    let v = StateVariable {
      name: "T".into(),
      members: Array::zeros((5, 4)),
      boundary: None,
    };
    let e = Ensemble::new(vec![v]).unwrap();
    let err = OwnedWorkspace::from_ensemble(&i, e).unwrap_err();
    assert!(matches!(err,
                     Error::Configuration(ConfigError::EnsembleShape {
                       expected: (5, 3),
                       found: (5, 4),
                     })));
  }

  fn spread_workspace(i: &Init) -> OwnedWorkspace {
    let members = arr2(&[[300.0, 300.0, 300.0],
                         [298.0, 300.0, 302.0],
                         [298.0, 300.0, 302.0],
                         [298.0, 300.0, 302.0],
                         [300.0, 300.0, 300.0]]);
    let v = StateVariable {
      name: "T".into(),
      members,
      boundary: i.variables[0].boundary.clone(),
    };
    OwnedWorkspace::from_ensemble(i, Ensemble::new(vec![v]).unwrap()).unwrap()
  }

  #[test]
  fn one_cycle_pulls_towards_the_measurement() {
    let i = init();
    let algo = Algo::new(&i).unwrap();
    let mut ws = spread_workspace(&i);
    let mut model = ModelStats::from(Persistence);
    let observer = SimpleObserver(|_, _, mut out| {
      out.fill(305.0);
      true
    });
    let mut rng = StdRng::seed_from_u64(5);

    let report = Algorithm::next_step(&algo, 1, 1, &mut rng, &mut ws,
                                      &mut model, &observer,
                                      &Cancellation::new())
      .unwrap();

    assert_eq!(report.cycle, 1);
    assert_eq!(report.time, 1.0);
    assert_eq!(ws.time(), 1.0);
    assert_eq!(report.skipped_cells, 0);
    assert_eq!(report.empty_cells, 2);
    assert_eq!(model.calls, 3);

    let mean = &report.means[0];
    assert_eq!(mean[0], 300.0);
    assert_eq!(mean[4], 300.0);
    for cell in 1..4 {
      assert!(mean[cell] > 300.0 && mean[cell] <= 305.0,
              "cell {} mean {}", cell, mean[cell]);
    }
  }

  /// Keeps every correction it is handed, then sums them.
  #[derive(Debug, Default)]
  struct Recording(Arc<Mutex<Vec<LocalCorrection>>>);
  impl GainAssembly for Recording {
    fn name(&self) -> &'static str { "recording" }
    fn assemble(&self, corrections: &[LocalCorrection],
                phi: ArrayViewMut<f64, Ix2>) {
      self.0.lock().unwrap().extend_from_slice(corrections);
      crate::kalman::gain::Summed.assemble(corrections, phi);
    }
  }

  #[test]
  fn measurements_are_perturbed_once_per_cycle() {
    let mut i = init();
    i.noise.measurement = PerVariable::Single(1.0);
    let mut algo = Algo::new(&i).unwrap();
    let recorded = Arc::new(Mutex::new(Vec::new()));
    algo.set_gain_assembly(Box::new(Recording(recorded.clone())));

    let mut ws = spread_workspace(&i);
    let forecast = ws.ensemble().variable(0).members.clone();
    let mut model = ModelStats::from(Persistence);
    let observer = SimpleObserver(|_, _, mut out| {
      out.fill(305.0);
      true
    });
    let mut rng = StdRng::seed_from_u64(11);
    let mut replay = rng.clone();

    Algorithm::next_step(&algo, 1, 1, &mut rng, &mut ws, &mut model,
                         &observer, &Cancellation::new())
      .unwrap();

    // no process noise: the only draw of the cycle is y_pert
    let y_pert = perturbed_observations(arr1(&[305.0]).view(), 3, 1.0,
                                        &mut replay)
      .unwrap();
    assert!(y_pert[[0, 0]] != y_pert[[0, 1]]);
    assert_eq!(rng.gen::<u64>(), replay.gen::<u64>());

    let corrections = recorded.lock().unwrap();
    let targets: Vec<usize> = corrections.iter().map(|c| c.target ).collect();
    assert_eq!(targets, vec![1, 2, 3]);

    let network = &i.variables[0].observations;
    for c in corrections.iter() {
      let x_local = forecast.select(Axis(0), &c.cells);
      let h = submatrix(&network.measurement_operator, &[0], &c.cells);
      let expected = local_analysis(x_local.view(), h.view(),
                                    network.covariance.view(), h.view(),
                                    y_pert.view())
        .unwrap();
      assert_eq!(c.values, expected, "target {}", c.target);
    }

    // every analysis reaching the observed cell corrects it identically
    let rows: Vec<_> = corrections
      .iter()
      .map(|c| c.values.row(c.row_of(2).unwrap()).to_owned() )
      .collect();
    for r in rows.iter().skip(1) {
      for (a, b) in r.iter().zip(rows[0].iter()) {
        assert!((a - b).abs() < 1e-12, "{} vs {}", a, b);
      }
    }
  }

  #[test]
  fn missing_measurement_fails_the_cycle() {
    let i = init();
    let algo = Algo::new(&i).unwrap();
    let mut ws = spread_workspace(&i);
    let mut model = ModelStats::from(Persistence);
    let observer = SimpleObserver(|_, _, _| false );
    let mut rng = StdRng::seed_from_u64(5);

    let err = Algorithm::next_step(&algo, 3, 5, &mut rng, &mut ws, &mut model,
                                   &observer, &Cancellation::new())
      .unwrap_err();
    assert!(matches!(err, Error::MissingObservation { cycle: 3, variable: 0 }));
  }

  #[test]
  fn process_noise_is_live() {
    let i = init();
    let mut algo = Algo::new(&i).unwrap();
    assert_eq!(algo.process_noise(), &PerVariable::Single(0.0));
    algo.set_process_noise(PerVariable::Single(2.0)).unwrap();
    assert_eq!(algo.process_noise(), &PerVariable::Single(2.0));
    assert!(algo.set_process_noise(PerVariable::Multiple(vec![])).is_err());
  }
}
