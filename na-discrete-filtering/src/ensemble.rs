//! Common stuffs for ensembles

use nd::{Array, ArrayView, ArrayViewMut, Axis, Ix1, Ix2};
use rand::Rng;
use rayon::prelude::*;
use tracing::trace;

use na_core::{Cancellation, ForecastStep, Model, ModelError, ModelStats};

use crate::error::{ConfigError, Error, Result};
use crate::forcing::Perturbation;

/// Dirichlet cells pinned to a fixed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
  pub cells: Vec<usize>,
  pub value: f64,
}
impl Boundary {
  pub fn new(cells: Vec<usize>, value: f64) -> Boundary {
    Boundary { cells, value, }
  }
  /// Overwrites the pinned rows of a `cells x members` matrix.
  pub fn apply(&self, mut members: ArrayViewMut<f64, Ix2>) {
    for &cell in self.cells.iter() {
      members.row_mut(cell).fill(self.value);
    }
  }
}

#[derive(Debug, Clone)]
pub struct StateVariable {
  pub name: String,
  /// `cells x members`
  pub members: Array<f64, Ix2>,
  pub boundary: Option<Boundary>,
}
impl StateVariable {
  pub fn enforce_boundary(&mut self) {
    if let Some(ref b) = self.boundary {
      b.apply(self.members.view_mut());
    }
  }
  /// Arithmetic mean over members.
  pub fn mean(&self) -> Array<f64, Ix1> {
    let q = self.members.ncols() as f64;
    self.members.sum_axis(Axis(1)) / q
  }
}

/// One `cells x members` matrix per state variable, all of the same shape.
#[derive(Debug, Clone)]
pub struct Ensemble {
  variables: Vec<StateVariable>,
  dim: (usize, usize),
}

impl Ensemble {
  pub fn new(variables: Vec<StateVariable>) -> Result<Ensemble> {
    let dim = match variables.first() {
      Some(v) => v.members.dim(),
      None => return Err(ConfigError::NoVariables.into()),
    };
    for v in variables.iter() {
      if v.members.dim() != dim {
        return Err(ConfigError::EnsembleShape {
          expected: dim,
          found: v.members.dim(),
        }.into());
      }
      if let Some(ref b) = v.boundary {
        if let Some(&cell) = b.cells.iter().find(|&&c| c >= dim.0 ) {
          return Err(ConfigError::BoundaryCell {
            variable: v.name.clone(),
            cell,
            cells: dim.0,
          }.into());
        }
      }
    }

    Ok(Ensemble {
      variables,
      dim,
    })
  }

  pub fn cell_count(&self) -> usize { self.dim.0 }
  pub fn ensemble_count(&self) -> usize { self.dim.1 }
  pub fn variable_count(&self) -> usize { self.variables.len() }

  pub fn variables(&self) -> &[StateVariable] { &self.variables }
  pub fn variable(&self, i: usize) -> &StateVariable { &self.variables[i] }
  pub fn variable_mut(&mut self, i: usize) -> &mut StateVariable {
    &mut self.variables[i]
  }
  pub fn names(&self) -> Vec<String> {
    self.variables.iter().map(|v| v.name.clone() ).collect()
  }

  pub fn enforce_boundaries(&mut self) {
    for v in self.variables.iter_mut() {
      v.enforce_boundary();
    }
  }

  pub fn means(&self) -> Vec<Array<f64, Ix1>> {
    self.variables.iter().map(|v| v.mean() ).collect()
  }

  /// Member `j` as `variables x cells`.
  pub fn member(&self, j: usize) -> Array<f64, Ix2> {
    let mut out = Array::zeros((self.variables.len(), self.dim.0));
    for (mut row, v) in out.rows_mut().into_iter().zip(self.variables.iter()) {
      row.assign(&v.members.column(j));
    }
    out
  }
  pub fn set_member(&mut self, j: usize, state: ArrayView<f64, Ix2>) {
    debug_assert_eq!(state.dim(), (self.variables.len(), self.dim.0));
    for (row, v) in state.rows().into_iter().zip(self.variables.iter_mut()) {
      v.members.column_mut(j).assign(&row);
    }
  }

  /// Applies `perturbation` to every member of variable `i`, then re-pins
  /// its boundary.
  pub fn perturb<R>(&mut self, i: usize, perturbation: &Perturbation,
                    rand: &mut R) -> Result<()>
    where R: Rng + ?Sized,
  {
    let v = &mut self.variables[i];
    perturbation.perturb_in_place(v.members.view_mut(), rand)?;
    v.enforce_boundary();
    Ok(())
  }
}

/// Builds a `cells x ensemble_count` ensemble: every column is `base` with
/// `perturbation` applied, then boundary cells are reset.
pub fn generate_ensemble<R>(base: ArrayView<f64, Ix1>,
                            ensemble_count: usize,
                            perturbation: &Perturbation,
                            boundary: Option<&Boundary>,
                            rand: &mut R)
  -> Result<Array<f64, Ix2>>
  where R: Rng + ?Sized,
{
  let mut members = Array::from_shape_fn((base.len(), ensemble_count),
                                         |(i, _)| base[i] );
  perturbation.perturb_in_place(members.view_mut(), rand)?;
  if let Some(b) = boundary {
    b.apply(members.view_mut());
  }
  Ok(members)
}

pub trait EnsembleWorkspace {
  fn ensemble(&self) -> &Ensemble;
  fn means(&self) -> Vec<Array<f64, Ix1>> {
    self.ensemble().means()
  }
}

pub trait EnsemblePredict {
  fn predict_ensemble(&mut self) -> &mut Ensemble;

  /// Advances every member by one forecast sub-step. Members run on the
  /// rayon pool; results are written back by member index and the first
  /// failure in member order is reported.
  fn ensemble_predict<M>(&mut self, step: &ForecastStep,
                         model: &mut ModelStats<M>,
                         cancel: &Cancellation) -> Result<()>
    where M: Model,
  {
    let ensemble = self.predict_ensemble();
    let q = ensemble.ensemble_count();
    let names = ensemble.names();
    let m = &model.model;

    let outcomes: Vec<Result<Array<f64, Ix2>>> = (0..q)
      .map(|j| ensemble.member(j) )
      .collect::<Vec<_>>()
      .into_par_iter()
      .enumerate()
      .map(|(j, mut state)| {
        if cancel.is_cancelled() {
          return Err(Error::Cancelled { cycle: step.cycle });
        }

        trace!(member = j, cycle = step.cycle, sub_step = step.sub_step,
               "running forecast");
        match m.run_model(step, j, state.view_mut()) {
          Ok(()) => {},
          Err(ModelError::Cancelled) => {
            return Err(Error::Cancelled { cycle: step.cycle });
          },
          Err(source) => {
            return Err(Error::Forecast { cycle: step.cycle, member: j, source, });
          },
        }

        let bad_row = state
          .rows()
          .into_iter()
          .position(|row| row.iter().any(|v| !v.is_finite() ));
        if let Some(i) = bad_row {
          return Err(Error::Forecast {
            cycle: step.cycle,
            member: j,
            source: ModelError::Malformed {
              variable: names[i].clone(),
              reason: "non-finite value in returned state".into(),
            },
          });
        }

        Ok(state)
      })
      .collect();

    model.calls += q as u64;

    let mut states = Vec::with_capacity(q);
    for outcome in outcomes.into_iter() {
      states.push(outcome?);
    }
    for (j, state) in states.into_iter().enumerate() {
      ensemble.set_member(j, state.view());
    }
    ensemble.enforce_boundaries();

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr1, Array1};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn variable(name: &str, members: Array<f64, Ix2>,
              boundary: Option<Boundary>) -> StateVariable {
    StateVariable {
      name: name.into(),
      members,
      boundary,
    }
  }

  #[test]
  fn zero_noise_gives_identical_columns() {
    let base = arr1(&[310.0, 305.0, 302.0, 301.0, 299.0]);
    let boundary = Boundary::new(vec![0, 4], 300.0);
    let mut rng = StdRng::seed_from_u64(1);
    let e = generate_ensemble(base.view(), 3, &Perturbation::new(0.0),
                              Some(&boundary), &mut rng)
      .unwrap();

    let expected = arr1(&[300.0, 305.0, 302.0, 301.0, 300.0]);
    assert_eq!(e.dim(), (5, 3));
    for col in e.columns() {
      assert_eq!(col, expected);
    }
  }

  #[test]
  fn generated_boundary_cells_are_exact() {
    let base = Array1::from_elem(6, 320.0);
    let boundary = Boundary::new(vec![0, 5], 300.0);
    let mut rng = StdRng::seed_from_u64(2);
    let e = generate_ensemble(base.view(), 8, &Perturbation::new(5.0),
                              Some(&boundary), &mut rng)
      .unwrap();
    assert!(e.row(0).iter().all(|&v| v == 300.0 ));
    assert!(e.row(5).iter().all(|&v| v == 300.0 ));
    assert!(e.row(2).iter().any(|&v| v != 320.0 ));
  }

  #[test]
  fn mismatched_variables_are_rejected() {
    let a = variable("T", Array::zeros((4, 3)), None);
    let b = variable("U", Array::zeros((5, 3)), None);
    let err = Ensemble::new(vec![a, b]).unwrap_err();
    assert!(matches!(err, Error::Configuration(ConfigError::EnsembleShape { .. })));
  }

  #[test]
  fn member_round_trips_through_set_member() {
    let a = variable("T", Array::from_shape_fn((3, 2), |(i, j)| (i * 10 + j) as f64 ), None);
    let b = variable("U", Array::from_shape_fn((3, 2), |(i, j)| -((i * 10 + j) as f64) ), None);
    let mut e = Ensemble::new(vec![a, b]).unwrap();

    let mut m = e.member(1);
    assert_eq!(m.row(0).to_vec(), vec![1.0, 11.0, 21.0]);
    assert_eq!(m.row(1).to_vec(), vec![-1.0, -11.0, -21.0]);

    m.mapv_inplace(|v| v * 2.0 );
    e.set_member(1, m.view());
    assert_eq!(e.variable(0).members.column(1).to_vec(), vec![2.0, 22.0, 42.0]);
    assert_eq!(e.variable(0).members.column(0).to_vec(), vec![0.0, 10.0, 20.0]);
  }

  struct Shift(f64);
  impl Model for Shift {
    fn run_model(&self, _step: &ForecastStep, member: usize,
                 mut state: ArrayViewMut<f64, Ix2>) -> na_core::Result<()> {
      state += self.0 * member as f64;
      Ok(())
    }
  }
  struct Failing;
  impl Model for Failing {
    fn run_model(&self, _step: &ForecastStep, member: usize,
                 mut state: ArrayViewMut<f64, Ix2>) -> na_core::Result<()> {
      if member == 1 {
        state.fill(::std::f64::NAN);
      }
      if member == 2 {
        return Err(ModelError::Process {
          status: "exit status: 1".into(),
          stderr: String::new(),
        });
      }
      Ok(())
    }
  }

  struct Ws(Ensemble);
  impl EnsemblePredict for Ws {
    fn predict_ensemble(&mut self) -> &mut Ensemble { &mut self.0 }
  }

  fn step() -> ForecastStep {
    ForecastStep { cycle: 4, sub_step: 0, time: 0.0, dt: 1.0, }
  }

  #[test]
  fn predict_runs_every_member_and_repins_boundary() {
    let v = variable("T", Array::from_elem((4, 3), 300.0),
                     Some(Boundary::new(vec![0, 3], 300.0)));
    let mut ws = Ws(Ensemble::new(vec![v]).unwrap());
    let mut model = ModelStats::from(Shift(1.0));

    ws.ensemble_predict(&step(), &mut model, &Cancellation::new()).unwrap();

    let m = &ws.0.variable(0).members;
    assert_eq!(model.calls, 3);
    assert_eq!(m.row(1).to_vec(), vec![300.0, 301.0, 302.0]);
    assert_eq!(m.row(0).to_vec(), vec![300.0; 3]);
    assert_eq!(m.row(3).to_vec(), vec![300.0; 3]);
  }

  #[test]
  fn first_failing_member_is_reported() {
    let v = variable("T", Array::from_elem((2, 3), 1.0), None);
    let mut ws = Ws(Ensemble::new(vec![v]).unwrap());
    let mut model = ModelStats::from(Failing);

    let err = ws.ensemble_predict(&step(), &mut model, &Cancellation::new())
      .unwrap_err();
    match err {
      Error::Forecast { cycle: 4, member: 1, source: ModelError::Malformed { ref variable, .. } } => {
        assert_eq!(variable, "T");
      },
      other => panic!("unexpected error {:?}", other),
    }
    // nothing written back
    assert!(ws.0.variable(0).members.iter().all(|&v| v == 1.0 ));
  }

  #[test]
  fn cancelled_predict_does_not_run_models() {
    let v = variable("T", Array::from_elem((2, 2), 1.0), None);
    let mut ws = Ws(Ensemble::new(vec![v]).unwrap());
    let mut model = ModelStats::from(Shift(1.0));
    let cancel = Cancellation::new();
    cancel.cancel();

    let err = ws.ensemble_predict(&step(), &mut model, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled { cycle: 4 }));
    assert!(ws.0.variable(0).members.iter().all(|&v| v == 1.0 ));
  }
}
