//! Folding cell-local corrections into the ensemble-wide `phi`.

use nd::{Array, ArrayViewMut, Ix1, Ix2};

use std::fmt::Debug;

/// The correction one local analysis produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCorrection {
  /// The cell the analysis was centred on.
  pub target: usize,
  /// Rows of `values`, as cell indices (`cellID`).
  pub cells: Vec<usize>,
  /// `K * innov`, `cells.len() x members`.
  pub values: Array<f64, Ix2>,
}

impl LocalCorrection {
  /// Row of `values` belonging to `cell`, if the analysis touched it.
  pub fn row_of(&self, cell: usize) -> Option<usize> {
    self.cells.binary_search(&cell).ok()
  }
}

/// Combines local corrections into `phi` (`cells x members`, zeroed by the
/// caller). Corrections arrive ordered by target cell.
pub trait GainAssembly: Send + Sync + Debug {
  fn name(&self) -> &'static str;
  fn assemble(&self, corrections: &[LocalCorrection],
              phi: ArrayViewMut<f64, Ix2>);
}

/// `phi(cellID, :) += K innov` for every analysis. Returns how many
/// analyses touched each cell.
fn accumulate(corrections: &[LocalCorrection],
              phi: &mut ArrayViewMut<f64, Ix2>) -> Array<f64, Ix1> {
  let mut hits = Array::zeros(phi.nrows());
  for c in corrections.iter() {
    for (row, &cell) in c.cells.iter().enumerate() {
      let mut dest = phi.row_mut(cell);
      dest += &c.values.row(row);
      hits[cell] += 1.0;
    }
  }
  hits
}

/// Sum of the local corrections, each weighted by one over the number of
/// analyses reaching its cell. A cell inside `n` overlapping neighbourhoods
/// receives the same innovation `n` times; the weights keep it from taking
/// the full gain once per neighbourhood.
#[derive(Debug, Clone, Copy, Default)]
pub struct Summed;
impl GainAssembly for Summed {
  fn name(&self) -> &'static str { "summed" }
  fn assemble(&self, corrections: &[LocalCorrection],
              mut phi: ArrayViewMut<f64, Ix2>) {
    let hits = accumulate(corrections, &mut phi);
    for (mut row, &n) in phi.rows_mut().into_iter().zip(hits.iter()) {
      if n > 1.0 {
        row /= n;
      }
    }
  }
}

/// Each analysis only writes its own target cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetCell;
impl GainAssembly for TargetCell {
  fn name(&self) -> &'static str { "target-cell" }
  fn assemble(&self, corrections: &[LocalCorrection],
              mut phi: ArrayViewMut<f64, Ix2>) {
    for c in corrections.iter() {
      if let Some(row) = c.row_of(c.target) {
        let mut dest = phi.row_mut(c.target);
        dest += &c.values.row(row);
      }
    }
  }
}

/// Plain `phi(cellID, :) += K innov` with no weighting. Where neighbourhoods
/// overlap an observed cell is corrected once per analysis that reaches it
/// and can overshoot the measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unweighted;
impl GainAssembly for Unweighted {
  fn name(&self) -> &'static str { "unweighted" }
  fn assemble(&self, corrections: &[LocalCorrection],
              mut phi: ArrayViewMut<f64, Ix2>) {
    accumulate(corrections, &mut phi);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GainAssemblyKind {
  Summed,
  TargetCell,
  Unweighted,
}
impl Default for GainAssemblyKind {
  fn default() -> GainAssemblyKind { GainAssemblyKind::Summed }
}
impl GainAssemblyKind {
  pub fn build(self) -> Box<dyn GainAssembly> {
    match self {
      GainAssemblyKind::Summed => Box::new(Summed),
      GainAssemblyKind::TargetCell => Box::new(TargetCell),
      GainAssemblyKind::Unweighted => Box::new(Unweighted),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr2, Array2};

  /// Two overlapping analyses on a 4 cell, 2 member grid.
  fn corrections() -> Vec<LocalCorrection> {
    vec![
      LocalCorrection {
        target: 1,
        cells: vec![0, 1, 2],
        values: arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]),
      },
      LocalCorrection {
        target: 2,
        cells: vec![1, 2],
        values: arr2(&[[10.0, 20.0], [30.0, 40.0]]),
      },
    ]
  }

  fn run(strategy: &dyn GainAssembly) -> Array2<f64> {
    let mut phi = Array2::zeros((4, 2));
    strategy.assemble(&corrections(), phi.view_mut());
    phi
  }

  #[test]
  fn summed_weights_overlapping_rows() {
    assert_eq!(run(&Summed),
               arr2(&[[1.0, 2.0],
                      [6.5, 12.0],
                      [17.5, 23.0],
                      [0.0, 0.0]]));
  }

  #[test]
  fn summed_agrees_where_analyses_overlap() {
    // the same correction reaching a cell twice is not applied twice
    let c = LocalCorrection {
      target: 0,
      cells: vec![0, 1],
      values: arr2(&[[1.0, 2.0], [4.0, 8.0]]),
    };
    let mut other = c.clone();
    other.target = 1;
    let mut phi = Array2::zeros((4, 2));
    Summed.assemble(&[c, other], phi.view_mut());
    assert_eq!(phi.row(1).to_vec(), vec![4.0, 8.0]);
  }

  #[test]
  fn target_cell_only_writes_the_centre() {
    assert_eq!(run(&TargetCell),
               arr2(&[[0.0, 0.0],
                      [3.0, 4.0],
                      [30.0, 40.0],
                      [0.0, 0.0]]));
  }

  #[test]
  fn unweighted_adds_every_row() {
    assert_eq!(run(&Unweighted),
               arr2(&[[1.0, 2.0],
                      [13.0, 24.0],
                      [35.0, 46.0],
                      [0.0, 0.0]]));
  }

  #[test]
  fn untouched_cells_stay_zero() {
    for kind in [GainAssemblyKind::Summed,
                 GainAssemblyKind::TargetCell,
                 GainAssemblyKind::Unweighted].iter() {
      let phi = run(&*kind.build());
      assert_eq!(phi.row(3).to_vec(), vec![0.0, 0.0], "{:?}", kind);
    }
  }

  #[test]
  fn default_is_summed() {
    assert_eq!(GainAssemblyKind::default().build().name(), "summed");
  }
}
