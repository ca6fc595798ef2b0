
use nd::{Array, ArrayView, Ix2};
use nd::linalg::general_mat_mul;

use nla::SymmetricSolve;

use crate::utils::sample_covariance;

pub mod enkf;
pub mod gain;

/// Kalman update of one local neighbourhood.
///
/// * `x_local`: forecast ensemble on the local cells, `cells x members`
/// * `h`: linearized operator `H(obs, cells)`
/// * `l`: pruned localized observation-error covariance, `obs x obs`
/// * `c`: measurement operator `C(obs, cells)`
/// * `y`: perturbed measurements, `obs x members`
///
/// Returns `K (y - C x_local)`, `cells x members`. The gain is obtained by a
/// Cholesky solve against `H P H^T + L`; if that matrix can't be factored the
/// factorization error is returned.
pub fn local_analysis(x_local: ArrayView<f64, Ix2>,
                      h: ArrayView<f64, Ix2>,
                      l: ArrayView<f64, Ix2>,
                      c: ArrayView<f64, Ix2>,
                      y: ArrayView<f64, Ix2>)
  -> nla::Result<Array<f64, Ix2>>
{
  let (cells, members) = x_local.dim();
  let obs = l.dim().0;
  debug_assert_eq!(h.dim(), (obs, cells));
  debug_assert_eq!(c.dim(), (obs, cells));
  debug_assert_eq!(y.dim(), (obs, members));

  let p = sample_covariance(&x_local);

  // innov = y - C x
  let mut innovation = y.to_owned();
  general_mat_mul(-1.0, &c, &x_local, 1.0, &mut innovation);

  // P H^T
  let mut p_ht = Array::zeros((cells, obs));
  general_mat_mul(1.0, &p, &h.t(), 0.0, &mut p_ht);

  // S = H P H^T + L
  let mut s = l.to_owned();
  general_mat_mul(1.0, &h, &p_ht, 1.0, &mut s);

  // S K^T = (P H^T)^T, S symmetric
  let k_t = s.symmetric_solve(&p_ht.t())?;

  let mut correction = Array::zeros((cells, members));
  general_mat_mul(1.0, &k_t.t(), &innovation, 0.0, &mut correction);
  Ok(correction)
}
