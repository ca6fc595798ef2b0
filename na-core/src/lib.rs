extern crate ndarray as nd;
extern crate num_traits;
extern crate thiserror;

use nd::prelude::*;
use nd::linalg::general_mat_vec_mul;
use nd::{Data, LinalgScalar};

use num_traits::{One, Zero};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use error::{ModelError, Result};

pub mod error;

/// Where in the assimilation a forecast call sits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastStep {
  /// 1-based assimilation cycle.
  pub cycle: u64,
  pub sub_step: u32,
  /// Simulation time at the start of the step.
  pub time: f64,
  pub dt: f64,
}
impl ForecastStep {
  pub fn end_time(&self) -> f64 { self.time + self.dt }
}

/// The forward model f(x, u). Opaque to the filter.
pub trait Model: Send + Sync {
  /// Advances one ensemble member by `step.dt`, in place. `state` is
  /// `variables x cells`, row order matching the filter's variables.
  ///
  /// Called concurrently for distinct members.
  fn run_model(&self, step: &ForecastStep, member: usize,
               state: ArrayViewMut<f64, Ix2>) -> Result<()>;
}
impl<'a, M> Model for &'a M
  where M: Model + ?Sized,
{
  fn run_model(&self, step: &ForecastStep, member: usize,
               state: ArrayViewMut<f64, Ix2>) -> Result<()> {
    (**self).run_model(step, member, state)
  }
}

#[derive(Debug)]
pub struct ModelStats<M> {
  pub model: M,
  pub calls: u64,
}
impl<M> From<M> for ModelStats<M> {
  fn from(v: M) -> ModelStats<M> {
    ModelStats {
      model: v,
      calls: 0,
    }
  }
}

/// Cooperative cancellation shared between the time loop and the model.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);
impl Cancellation {
  pub fn new() -> Cancellation { Default::default() }
  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub trait Operator<E, Dim>: Send + Sync
  where Dim: nd::Dimension,
{
  fn operator_input_dim(&self) -> usize;
  fn operator_output_dim(&self) -> usize;
  fn eval_at(&self, x: ArrayView<E, Dim>,
             out: ArrayViewMut<E, Dim>) -> Result<()>;
}

impl<D, E> Operator<E, Ix1> for ArrayBase<D, Ix2>
  where D: Data<Elem = E> + Send + Sync,
        E: LinalgScalar + Sync + Send,
{
  fn operator_input_dim(&self) -> usize { self.ncols() }
  fn operator_output_dim(&self) -> usize { self.nrows() }
  fn eval_at(&self, x: ArrayView<E, Ix1>,
             mut out: ArrayViewMut<E, Ix1>) -> Result<()> {
    if x.len() != self.ncols() {
      return Err(ModelError::Dimension {
        what: "operator input",
        expected: self.ncols(),
        found: x.len(),
      });
    }
    if out.len() != self.nrows() {
      return Err(ModelError::Dimension {
        what: "operator output",
        expected: self.nrows(),
        found: out.len(),
      });
    }

    general_mat_vec_mul(One::one(),
                        self, &x, Zero::zero(),
                        &mut out);

    Ok(())
  }
}
