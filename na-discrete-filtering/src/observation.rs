use nd::{Array, ArrayView, Ix1, Ix2};
use rand::Rng;

use crate::error::{ConfigError, Result};
use crate::forcing::{NegativePolicy, Perturbation};

/// Where and how one state variable is observed.
#[derive(Debug, Clone)]
pub struct ObservationNetwork {
  /// Cell each observation sits on; its coordinate drives localization.
  pub cells: Vec<usize>,
  /// C, `observations x cells`.
  pub measurement_operator: Array<f64, Ix2>,
  /// H, `observations x cells`. Equal to C for linear point observations.
  pub linearized_operator: Array<f64, Ix2>,
  /// R, `observations x observations`.
  pub covariance: Array<f64, Ix2>,
}

impl ObservationNetwork {
  /// Point observations of single cells with independent errors.
  pub fn point(cells: Vec<usize>, cell_count: usize,
               variances: ArrayView<f64, Ix1>) -> ObservationNetwork {
    let mut c = Array::zeros((cells.len(), cell_count));
    for (k, &cell) in cells.iter().enumerate() {
      if cell < cell_count {
        c[[k, cell]] = 1.0;
      }
    }

    ObservationNetwork {
      cells,
      linearized_operator: c.clone(),
      measurement_operator: c,
      covariance: Array::from_diag(&variances),
    }
  }

  pub fn len(&self) -> usize { self.cells.len() }
  pub fn is_empty(&self) -> bool { self.cells.is_empty() }

  pub fn validate(&self, variable: &str, cell_count: usize)
    -> ::std::result::Result<(), ConfigError>
  {
    let obs = self.len();
    if let Some(&cell) = self.cells.iter().find(|&&c| c >= cell_count ) {
      return Err(ConfigError::ObservationCell {
        variable: variable.into(),
        cell,
        cells: cell_count,
      });
    }

    let shapes = [
      ("measurement operator C", self.measurement_operator.dim(), (obs, cell_count)),
      ("linearized operator H", self.linearized_operator.dim(), (obs, cell_count)),
      ("observation-error covariance R", self.covariance.dim(), (obs, obs)),
    ];
    for &(what, found, expected) in shapes.iter() {
      if found != expected {
        return Err(ConfigError::OperatorShape {
          variable: variable.into(),
          what,
          expected,
          found,
        });
      }
    }

    let r = &self.covariance;
    let finite = r.iter()
      .chain(self.measurement_operator.iter())
      .chain(self.linearized_operator.iter())
      .all(|v| v.is_finite() );
    if !finite {
      return Err(ConfigError::InvalidParameter {
        what: format!("`{}` observation operators and covariance", variable),
        value: ::std::f64::NAN,
      });
    }
    for i in 0..obs {
      for j in i + 1..obs {
        if r[[i, j]] != r[[j, i]] {
          return Err(ConfigError::AsymmetricCovariance {
            variable: variable.into(),
          });
        }
      }
    }

    Ok(())
  }
}

/// `y_pert`: the measurement vector replicated once per member with
/// independent noise. Drawn once per variable per cycle and shared by every
/// local analysis of that cycle.
///
/// Negative draws are kept; clipping observation noise would bias the
/// analysis.
pub fn perturbed_observations<R>(y: ArrayView<f64, Ix1>,
                                 ensemble_count: usize,
                                 std_percent: f64,
                                 rand: &mut R)
  -> Result<Array<f64, Ix2>>
  where R: Rng + ?Sized,
{
  let mut y_pert = Array::from_shape_fn((y.len(), ensemble_count),
                                        |(k, _)| y[k] );
  Perturbation::new(std_percent)
    .with_negative_policy(NegativePolicy::Allow)
    .perturb_in_place(y_pert.view_mut(), rand)?;
  Ok(y_pert)
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  #[test]
  fn point_network_is_one_hot() {
    let net = ObservationNetwork::point(vec![2, 0], 4, arr1(&[1.0, 2.0]).view());
    assert_eq!(net.measurement_operator,
               arr2(&[[0.0, 0.0, 1.0, 0.0],
                      [1.0, 0.0, 0.0, 0.0]]));
    assert_eq!(net.linearized_operator, net.measurement_operator);
    assert_eq!(net.covariance, arr2(&[[1.0, 0.0], [0.0, 2.0]]));
    assert!(net.validate("T", 4).is_ok());
  }

  #[test]
  fn out_of_range_observation_cell() {
    let net = ObservationNetwork::point(vec![5], 4, arr1(&[1.0]).view());
    assert_eq!(net.validate("T", 4),
               Err(ConfigError::ObservationCell {
                 variable: "T".into(),
                 cell: 5,
                 cells: 4,
               }));
  }

  #[test]
  fn mismatched_covariance_shape() {
    let mut net = ObservationNetwork::point(vec![1, 2], 4, arr1(&[1.0, 1.0]).view());
    net.covariance = arr2(&[[1.0]]);
    assert!(matches!(net.validate("T", 4),
                     Err(ConfigError::OperatorShape { expected: (2, 2), found: (1, 1), .. })));
  }

  #[test]
  fn asymmetric_covariance_is_rejected() {
    let mut net = ObservationNetwork::point(vec![1, 2], 4, arr1(&[1.0, 1.0]).view());
    net.covariance[[0, 1]] = 0.5;
    assert!(matches!(net.validate("T", 4),
                     Err(ConfigError::AsymmetricCovariance { .. })));
  }

  #[test]
  fn zero_measurement_noise_replicates_y() {
    let y = arr1(&[305.0, 290.0]);
    let mut rng = StdRng::seed_from_u64(3);
    let y_pert = perturbed_observations(y.view(), 3, 0.0, &mut rng).unwrap();
    assert_eq!(y_pert, arr2(&[[305.0, 305.0, 305.0],
                              [290.0, 290.0, 290.0]]));
  }

  #[test]
  fn perturbed_members_differ() {
    let y = arr1(&[305.0]);
    let mut rng = StdRng::seed_from_u64(3);
    let y_pert = perturbed_observations(y.view(), 4, 1.0, &mut rng).unwrap();
    assert!(y_pert[[0, 0]] != y_pert[[0, 1]]);
  }
}
