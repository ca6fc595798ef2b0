use nd::{Array, ArrayBase, Axis, Data, Ix2};
use nd::linalg::general_mat_mul;

use std::ops::Index;

/// Unbiased sample covariance of the rows of `x`, treating columns as
/// ensemble members (`q - 1` degrees of freedom).
///
/// Needs at least two columns; that is enforced when the filter is
/// configured, here a single column just yields zeros.
pub fn sample_covariance<S>(x: &ArrayBase<S, Ix2>) -> Array<f64, Ix2>
  where S: Data<Elem = f64>,
{
  let (n, q) = x.dim();
  let mut c = Array::zeros((n, n));
  if q < 2 {
    return c;
  }

  let s = ((q - 1) as f64).sqrt();
  let mean = x.sum_axis(Axis(1)) / q as f64;

  // Xhat
  let mut centered = x.to_owned();
  centered -= &mean.insert_axis(Axis(1));
  centered.mapv_inplace(|v| v / s );

  general_mat_mul(1.0,
                  &centered,
                  &centered.t(),
                  0.0,
                  &mut c);
  c
}

/// `a[rows, cols]` as an owned matrix.
pub fn submatrix<S>(a: &ArrayBase<S, Ix2>, rows: &[usize], cols: &[usize])
  -> Array<f64, Ix2>
  where S: Data<Elem = f64>,
{
  a.select(Axis(0), rows)
    .select(Axis(1), cols)
}

/// A parameter given either once for all state variables or once per
/// variable.
#[derive(Debug, Clone, PartialEq)]
pub enum PerVariable<E> {
  Single(E),
  Multiple(Vec<E>),
}
impl<E> PerVariable<E> {
  pub fn matches(&self, variables: usize) -> bool {
    match self {
      &PerVariable::Single(_) => true,
      &PerVariable::Multiple(ref v) => v.len() == variables,
    }
  }
  pub fn entries(&self) -> usize {
    match self {
      &PerVariable::Single(_) => 1,
      &PerVariable::Multiple(ref v) => v.len(),
    }
  }
  pub fn iter(&self) -> Box<dyn Iterator<Item = &E> + '_> {
    match self {
      &PerVariable::Single(ref e) => Box::new(::std::iter::once(e)),
      &PerVariable::Multiple(ref v) => Box::new(v.iter()),
    }
  }
}
impl<E> Index<usize> for PerVariable<E> {
  type Output = E;
  fn index(&self, idx: usize) -> &E {
    match self {
      &PerVariable::Single(ref e) => e,
      &PerVariable::Multiple(ref v) => &v[idx],
    }
  }
}
impl<E> From<E> for PerVariable<E> {
  fn from(v: E) -> PerVariable<E> {
    PerVariable::Single(v)
  }
}
impl<E> From<Vec<E>> for PerVariable<E> {
  fn from(v: Vec<E>) -> Self {
    PerVariable::Multiple(v)
  }
}
