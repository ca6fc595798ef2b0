//! Localized ensemble Kalman filtering over gridded state fields.
//!
//! The filter owns an ensemble (one `cells x members` matrix per state
//! variable), pushes every member through an opaque forward model and corrects
//! the result with cell-local Kalman updates restricted to observations within
//! a localization radius.

extern crate ndarray as nd;
extern crate na_core;
extern crate nla_factorize as nla;
extern crate num_traits;
extern crate rand;
extern crate rand_distr;
extern crate rayon;
extern crate serde;
extern crate thiserror;
extern crate tracing;

use nd::{ArrayViewMut, Ix1};
use rand::Rng;

pub use na_core::{Cancellation, ForecastStep, Model, ModelError, ModelStats};

pub use assimilate::{CycleReport, Phase, RunFailure};
pub use error::{ConfigError, Error, Result};
pub use history::FilterHistory;

pub mod assimilate;
pub mod ensemble;
pub mod error;
pub mod forcing;
pub mod history;
pub mod kalman;
pub mod localization;
pub mod observation;
pub mod utils;

/// Source of measurements, one vector per variable per cycle.
pub trait Observer: Sync {
  /// Fills `out` with the measurements of `variable` for `cycle`. Returns
  /// `false` if there are none.
  fn observe_into(&self, cycle: u64, variable: usize,
                  out: ArrayViewMut<f64, Ix1>) -> bool;
}

pub struct SimpleObserver<F>(pub F)
  where F: Fn(u64, usize, ArrayViewMut<f64, Ix1>) -> bool + Sync;
impl<F> Observer for SimpleObserver<F>
  where F: Fn(u64, usize, ArrayViewMut<f64, Ix1>) -> bool + Sync,
{
  fn observe_into(&self, cycle: u64, variable: usize,
                  out: ArrayViewMut<f64, Ix1>) -> bool {
    (self.0)(cycle, variable, out)
  }
}

pub trait Initializer { }

pub trait Workspace<I>: Sized
  where I: Initializer,
{
  fn alloc<R>(i: &I, rand: &mut R) -> Result<Self>
    where R: Rng + ?Sized;
}

pub trait Algorithm<M, Ob>: Sized
  where M: Model,
        Ob: Observer,
{
  type Init: Initializer;
  type WS: Workspace<Self::Init> + ensemble::EnsembleWorkspace;

  fn init(i: &Self::Init) -> Result<Self>;

  /// Runs one full forecast/analysis cycle.
  fn next_step<R>(&self,
                  cycle: u64,
                  total_cycles: u64,
                  rand: &mut R,
                  workspace: &mut Self::WS,
                  model: &mut ModelStats<M>,
                  observer: &Ob,
                  cancel: &Cancellation)
                  -> Result<CycleReport>
    where R: Rng + ?Sized;
}
