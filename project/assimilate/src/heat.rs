//! In-process 1-D heat equation, `u_t = alpha u_xx`, explicit in time.
//! Stands in for the external solver in twin experiments.

use anyhow::{bail, Result};
use nd::{Array, ArrayViewMut, Ix1, Ix2};

use na_core::{ForecastStep, Model, ModelError};

/// Largest `alpha dt / h^2` used per inner step; 0.5 is the FTCS limit.
const STABILITY: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct HeatModel {
  coordinates: Array<f64, Ix1>,
  diffusivity: f64,
  min_spacing: f64,
}

impl HeatModel {
  pub fn new(coordinates: Array<f64, Ix1>, diffusivity: f64) -> Result<HeatModel> {
    if coordinates.len() < 3 {
      bail!("the heat model needs at least 3 cells, got {}", coordinates.len());
    }
    if !(diffusivity.is_finite() && diffusivity >= 0.0) {
      bail!("diffusivity must be finite and non-negative, got {}", diffusivity);
    }
    let min_spacing = (1..coordinates.len())
      .map(|i| coordinates[i] - coordinates[i - 1] )
      .fold(::std::f64::INFINITY, f64::min);
    if !(min_spacing > 0.0) {
      bail!("cell coordinates must be strictly increasing");
    }

    Ok(HeatModel {
      coordinates,
      diffusivity,
      min_spacing,
    })
  }

  /// Inner steps needed to cover `dt` stably.
  pub fn inner_steps(&self, dt: f64) -> usize {
    let r = self.diffusivity * dt / (self.min_spacing * self.min_spacing);
    ((r / STABILITY).ceil() as usize).max(1)
  }

  /// One FTCS step on one row. The end cells are held.
  fn step_row(&self, row: &mut [f64], scratch: &mut [f64], dt: f64) {
    let x = &self.coordinates;
    scratch.copy_from_slice(row);
    for i in 1..row.len() - 1 {
      let hl = x[i] - x[i - 1];
      let hr = x[i + 1] - x[i];
      let uxx = 2.0 / (hl + hr)
        * ((scratch[i + 1] - scratch[i]) / hr - (scratch[i] - scratch[i - 1]) / hl);
      row[i] = scratch[i] + self.diffusivity * dt * uxx;
    }
  }
}

impl Model for HeatModel {
  fn run_model(&self, step: &ForecastStep, _member: usize,
               mut state: ArrayViewMut<f64, Ix2>) -> na_core::Result<()> {
    let cells = self.coordinates.len();
    if state.ncols() != cells {
      return Err(ModelError::Dimension {
        what: "heat model state",
        expected: cells,
        found: state.ncols(),
      });
    }

    let n = self.inner_steps(step.dt);
    let dt = step.dt / n as f64;
    let mut row = vec![0.0; cells];
    let mut scratch = vec![0.0; cells];
    for mut r in state.rows_mut() {
      for (dst, &v) in row.iter_mut().zip(r.iter()) {
        *dst = v;
      }
      for _ in 0..n {
        self.step_row(&mut row, &mut scratch, dt);
      }
      for (dst, &v) in r.iter_mut().zip(row.iter()) {
        *dst = v;
      }
    }
    Ok(())
  }
}
