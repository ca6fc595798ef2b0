use nd::{Array, ArrayBase, ArrayViewMut, Data, Ix2};
use num_traits::{Float, NumCast, One, Zero};

use crate::error::{Error, Result};

pub trait Cholesky {
  type Elem;
  /// Returns the upper triangular factor, R, of A = R^*R.
  ///
  /// Only the upper triangle of `self` is read. A pivot at or below
  /// `eps * n * max|A_ii|` is rejected, so near-singular matrices fail here
  /// instead of producing garbage in the solve.
  fn l_lstar(&self) -> Result<Array<Self::Elem, Ix2>>;
}

impl<S> Cholesky for ArrayBase<S, Ix2>
  where S: Data,
        S::Elem: Float,
{
  type Elem = S::Elem;

  fn l_lstar(&self) -> Result<Array<S::Elem, Ix2>> {
    let (m, n) = self.dim();
    if m != n {
      return Err(Error::NotSquare { rows: m, cols: n, });
    }

    let mut r = Array::zeros((m, m));
    if m == 0 {
      return Ok(r);
    }

    let scale = (0..m)
      .map(|i| self[[i, i]].abs() )
      .fold(S::Elem::zero(), |a, b| a.max(b) );
    let order: S::Elem = NumCast::from(m)
      .unwrap_or_else(S::Elem::one);
    let tol = scale * S::Elem::epsilon() * order;

    for k in 0..m {
      let mut d = self[[k, k]];
      for i in 0..k {
        d = d - r[[i, k]] * r[[i, k]];
      }
      // written so NaN also lands in the error branch
      if !(d > tol) {
        return Err(Error::NotPositiveDefinite { pivot: k, });
      }

      let rkk = d.sqrt();
      r[[k, k]] = rkk;
      for j in k + 1..m {
        let mut v = self[[k, j]];
        for i in 0..k {
          v = v - r[[i, k]] * r[[i, j]];
        }
        r[[k, j]] = v / rkk;
      }
    }

    Ok(r)
  }
}

/// Solves `R^*R X = B` for every column of `b`, overwriting `b` with `X`.
pub fn solve_multi_into<S, E>(r: &ArrayBase<S, Ix2>,
                              mut b: ArrayViewMut<E, Ix2>) -> Result<()>
  where S: Data<Elem = E>,
        E: Float,
{
  let m = r.dim().0;
  if b.dim().0 != m {
    return Err(Error::DimensionMismatch {
      expected: m,
      found: b.dim().0,
    });
  }

  for mut col in b.columns_mut() {
    // R^* z = b
    for i in 0..m {
      let mut v = col[i];
      for k in 0..i {
        v = v - r[[k, i]] * col[k];
      }
      col[i] = v / r[[i, i]];
    }
    // R x = z
    for i in (0..m).rev() {
      let mut v = col[i];
      for k in i + 1..m {
        v = v - r[[i, k]] * col[k];
      }
      col[i] = v / r[[i, i]];
    }
  }

  Ok(())
}

pub trait SymmetricSolve<E> {
  /// Solves `A X = B` for symmetric positive definite `A`, without ever
  /// forming `A^-1`.
  fn symmetric_solve<S2>(&self, b: &ArrayBase<S2, Ix2>) -> Result<Array<E, Ix2>>
    where S2: Data<Elem = E>;
}

impl<S, E> SymmetricSolve<E> for ArrayBase<S, Ix2>
  where S: Data<Elem = E>,
        E: Float,
{
  fn symmetric_solve<S2>(&self, b: &ArrayBase<S2, Ix2>) -> Result<Array<E, Ix2>>
    where S2: Data<Elem = E>,
  {
    let r = self.l_lstar()?;
    let mut x = b.to_owned();
    solve_multi_into(&r, x.view_mut())?;
    Ok(x)
  }
}

#[test]
fn cholesky_llstar() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);

  let l = a.l_lstar().expect("cholesky factorization failed");

  let expected = arr2(&[
    [2.0, 6.0, -8.0],
    [0.0, 1.0, 5.0],
    [0.0, 0.0, 3.0],
  ]);
  assert_eq!(l, expected);
}

#[test]
fn cholesky_single_precision() {
  use nd::arr2;

  let a: Array<f32, Ix2> = arr2(&[[4.0, 2.0], [2.0, 5.0]]);
  let l = a.l_lstar().expect("cholesky factorization failed");
  assert_eq!(l, arr2(&[[2.0, 1.0], [0.0, 2.0]]));

  let z: Array<f32, Ix2> = Array::zeros((2, 2));
  assert!(z.l_lstar().is_err());
}

#[test]
fn symmetric_solve_recovers_rhs() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);
  let x_true = arr2(&[
    [1.0, -2.0],
    [0.5, 3.0],
    [-1.0, 0.25],
  ]);
  let b = a.dot(&x_true);

  let x = a.symmetric_solve(&b).expect("solve failed");
  for (l, r) in x.iter().zip(x_true.iter()) {
    assert!((l - r).abs() < 1e-10, "{} != {}", l, r);
  }
}

#[test]
fn singular_matrix_is_rejected() {
  use nd::arr2;

  let a = arr2(&[
    [1.0, 1.0],
    [1.0, 1.0],
  ]);
  assert_eq!(a.l_lstar(), Err(Error::NotPositiveDefinite { pivot: 1 }));

  let z: Array<f64, Ix2> = Array::zeros((2, 2));
  assert_eq!(z.l_lstar(), Err(Error::NotPositiveDefinite { pivot: 0 }));
}

#[test]
fn non_square_and_empty() {
  use nd::Array2;

  let a: Array2<f64> = Array2::zeros((2, 3));
  assert_eq!(a.l_lstar(), Err(Error::NotSquare { rows: 2, cols: 3 }));

  let e: Array2<f64> = Array2::zeros((0, 0));
  assert_eq!(e.l_lstar().map(|r| r.dim() ), Ok((0, 0)));
}
