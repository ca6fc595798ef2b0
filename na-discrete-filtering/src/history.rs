//! `filterData`: the ensemble-mean trajectory, one column per cycle.

use nd::{Array, Ix1, Ix2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableHistory {
  pub name: String,
  /// Column 0 is the initial mean, column k the mean after cycle k.
  pub columns: Vec<Array<f64, Ix1>>,
}

/// Append-only; a run that fails keeps what it had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterHistory {
  pub variables: Vec<VariableHistory>,
}

impl FilterHistory {
  pub fn new<I, S>(names: I) -> FilterHistory
    where I: IntoIterator<Item = S>,
          S: Into<String>,
  {
    FilterHistory {
      variables: names
        .into_iter()
        .map(|name| VariableHistory {
          name: name.into(),
          columns: Vec::new(),
        })
        .collect(),
    }
  }

  /// Appends one mean per variable, in variable order.
  pub fn push(&mut self, means: Vec<Array<f64, Ix1>>) {
    debug_assert_eq!(means.len(), self.variables.len());
    for (v, m) in self.variables.iter_mut().zip(means.into_iter()) {
      v.columns.push(m);
    }
  }

  /// Number of stored columns.
  pub fn len(&self) -> usize {
    self.variables
      .first()
      .map(|v| v.columns.len() )
      .unwrap_or(0)
  }
  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn variable(&self, name: &str) -> Option<&VariableHistory> {
    self.variables.iter().find(|v| v.name == name )
  }

  /// Variable `i` as a `cells x columns` matrix.
  pub fn matrix(&self, i: usize) -> Array<f64, Ix2> {
    let columns = &self.variables[i].columns;
    let cells = columns.first().map(|c| c.len() ).unwrap_or(0);
    Array::from_shape_fn((cells, columns.len()), |(r, c)| columns[c][r] )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr1, arr2};

  #[test]
  fn push_and_matrix() {
    let mut h = FilterHistory::new(vec!["T", "U"]);
    assert!(h.is_empty());
    h.push(vec![arr1(&[1.0, 2.0]), arr1(&[5.0, 6.0])]);
    h.push(vec![arr1(&[3.0, 4.0]), arr1(&[7.0, 8.0])]);
    assert_eq!(h.len(), 2);
    assert_eq!(h.matrix(0), arr2(&[[1.0, 3.0], [2.0, 4.0]]));
    assert_eq!(h.variable("U").unwrap().columns[1], arr1(&[7.0, 8.0]));
    assert!(h.variable("V").is_none());
  }
}
