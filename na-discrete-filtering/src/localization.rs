//! Distance-based localization of observations around a target cell.

use nd::{Array, ArrayBase, ArrayView, Axis, Data, Ix1, Ix2};

use crate::error::{Error, Result};
use crate::observation::ObservationNetwork;

/// `radius - distance` is rounded to this many decimals before the step is
/// taken, so coordinates that are equal up to float noise land on the same
/// side of the radius.
pub const MASK_DECIMALS: i32 = 5;

/// Right-continuous Heaviside step of `radius - |distance|`: 1 inside and on
/// the radius, 0 beyond it.
pub fn mask_value(radius: f64, distance: f64) -> f64 {
  let scale = 10f64.powi(MASK_DECIMALS);
  let v = ((radius - distance.abs()) * scale).round() / scale;
  if v >= 0.0 { 1.0 } else { 0.0 }
}

/// The observations and cells one local analysis works on.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSet {
  pub cell: usize,
  /// Active observations, ascending.
  pub obs_id: Vec<usize>,
  /// Target cell plus every cell the active observations touch, ascending.
  pub cell_id: Vec<usize>,
  /// Pruned localized R, `obs_id.len()` square.
  pub l_matrix: Array<f64, Ix2>,
}

#[derive(Debug, Clone, Copy)]
pub struct Localizer<'a> {
  coordinates: ArrayView<'a, f64, Ix1>,
  radius: f64,
}

impl<'a> Localizer<'a> {
  pub fn new(coordinates: ArrayView<'a, f64, Ix1>, radius: f64) -> Localizer<'a> {
    Localizer {
      coordinates,
      radius,
    }
  }

  /// Mask over the observations sitting on `observation_cells`, seen from
  /// `cell`.
  pub fn mask(&self, cell: usize, observation_cells: &[usize]) -> Array<f64, Ix1> {
    let x = self.coordinates[cell];
    observation_cells
      .iter()
      .map(|&c| mask_value(self.radius, self.coordinates[c] - x) )
      .collect()
  }

  /// Localizes `network` around `cell` of variable `variable`.
  ///
  /// Fails with `LocalizationEmpty` when nothing survives the mask and the
  /// pruning, and with `NumericalInstability` when pruning leaves a
  /// non-square `Lmatrix`.
  pub fn localize(&self, variable: usize, cell: usize,
                  network: &ObservationNetwork) -> Result<LocalSet> {
    let mask = self.mask(cell, &network.cells);
    let localized = localize_covariance(&mask, &network.covariance);
    let (l_matrix, rows, cols) = prune_zero_lines(&localized);

    if rows != cols {
      return Err(Error::NumericalInstability {
        variable,
        cell,
        source: nla::Error::NotSquare {
          rows: rows.len(),
          cols: cols.len(),
        },
      });
    }
    if rows.is_empty() {
      return Err(Error::LocalizationEmpty { variable, cell, });
    }

    let cell_id = constrained_cells(&network.measurement_operator, &rows, cell);

    Ok(LocalSet {
      cell,
      obs_id: rows,
      cell_id,
      l_matrix,
    })
  }
}

/// `mask_k * mask_l * R_kl`.
pub fn localize_covariance<S1, S2>(mask: &ArrayBase<S1, Ix1>,
                                   r: &ArrayBase<S2, Ix2>) -> Array<f64, Ix2>
  where S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
{
  Array::from_shape_fn(r.dim(), |(k, l)| mask[k] * mask[l] * r[[k, l]] )
}

/// Drops every row and every column that is entirely zero. Rows and columns
/// are judged on the input, so the two removals don't influence each other.
/// Returns the pruned matrix and the kept row and column indices.
pub fn prune_zero_lines<S>(m: &ArrayBase<S, Ix2>)
  -> (Array<f64, Ix2>, Vec<usize>, Vec<usize>)
  where S: Data<Elem = f64>,
{
  let rows: Vec<usize> = m.axis_iter(Axis(0))
    .enumerate()
    .filter(|(_, row)| row.iter().any(|&v| v != 0.0 ) )
    .map(|(i, _)| i )
    .collect();
  let cols: Vec<usize> = m.axis_iter(Axis(1))
    .enumerate()
    .filter(|(_, col)| col.iter().any(|&v| v != 0.0 ) )
    .map(|(i, _)| i )
    .collect();

  let pruned = m.select(Axis(0), &rows)
    .select(Axis(1), &cols);
  (pruned, rows, cols)
}

/// `target` plus every cell with a nonzero entry in `C(obs_id, :)`, sorted.
pub fn constrained_cells<S>(c: &ArrayBase<S, Ix2>, obs_id: &[usize],
                            target: usize) -> Vec<usize>
  where S: Data<Elem = f64>,
{
  let mut cells = vec![target];
  for &k in obs_id.iter() {
    cells.extend(c.row(k)
                 .iter()
                 .enumerate()
                 .filter(|&(_, &v)| v != 0.0 )
                 .map(|(j, _)| j ));
  }
  cells.sort_unstable();
  cells.dedup();
  cells
}
