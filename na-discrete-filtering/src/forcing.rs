//! Percent-of-magnitude Gaussian noise: initial ensemble spread, process
//! noise and measurement perturbation all go through here.

use nd::{ArrayViewMut, Ix2};

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{Error, Result};

/// Draws allowed per entry under `NegativePolicy::Resample`.
pub const MAX_RESAMPLE_ATTEMPTS: usize = 64;

/// What to do with a perturbed value that came out negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegativePolicy {
  /// Clamp to zero.
  Clip,
  /// Redraw, up to `MAX_RESAMPLE_ATTEMPTS` times.
  Resample,
  /// Fail on the first negative draw.
  Reject,
  /// Keep it. For fields that may legitimately go below zero.
  Allow,
}
impl Default for NegativePolicy {
  fn default() -> NegativePolicy { NegativePolicy::Resample }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbation {
  /// Standard deviation in percent of each entry's magnitude.
  pub std_percent: f64,
  /// Stands in for the magnitude of entries that are exactly zero.
  pub reference_magnitude: f64,
  pub negative_policy: NegativePolicy,
}

impl Perturbation {
  pub fn new(std_percent: f64) -> Perturbation {
    Perturbation {
      std_percent,
      reference_magnitude: 1.0,
      negative_policy: Default::default(),
    }
  }
  pub fn with_reference_magnitude(mut self, magnitude: f64) -> Perturbation {
    self.reference_magnitude = magnitude;
    self
  }
  pub fn with_negative_policy(mut self, policy: NegativePolicy) -> Perturbation {
    self.negative_policy = policy;
    self
  }

  pub fn is_zero(&self) -> bool { self.std_percent == 0.0 }

  fn std_dev(&self, base: f64) -> f64 {
    let magnitude = if base == 0.0 {
      self.reference_magnitude
    } else {
      base.abs()
    };
    self.std_percent / 100.0 * magnitude
  }

  /// Adds independent noise to every entry of `values`. A zero standard
  /// deviation leaves `values` untouched and draws nothing from `rand`.
  pub fn perturb_in_place<R>(&self, mut values: ArrayViewMut<f64, Ix2>,
                             rand: &mut R) -> Result<()>
    where R: Rng + ?Sized,
  {
    if self.is_zero() {
      return Ok(());
    }

    for v in values.iter_mut() {
      let base = *v;
      let sd = self.std_dev(base);

      let mut attempts = 0;
      *v = loop {
        let xi: f64 = StandardNormal.sample(rand);
        let draw = base + sd * xi;
        attempts += 1;
        if draw >= 0.0 {
          break draw;
        }

        match self.negative_policy {
          NegativePolicy::Allow => break draw,
          NegativePolicy::Clip => break 0.0,
          NegativePolicy::Reject => {
            return Err(Error::InvalidSample { attempts, value: draw, });
          },
          NegativePolicy::Resample if attempts >= MAX_RESAMPLE_ATTEMPTS => {
            return Err(Error::InvalidSample { attempts, value: draw, });
          },
          NegativePolicy::Resample => continue,
        }
      };
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nd::{arr2, Array2};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn rng() -> StdRng { StdRng::seed_from_u64(7) }

  #[test]
  fn zero_std_is_identity() {
    let mut x = arr2(&[[300.0, 0.0], [-4.0, 12.5]]);
    let expected = x.clone();
    Perturbation::new(0.0)
      .perturb_in_place(x.view_mut(), &mut rng())
      .unwrap();
    assert_eq!(x, expected);
  }

  #[test]
  fn noise_scales_with_magnitude() {
    let mut x = Array2::from_elem((1, 4000), 200.0);
    Perturbation::new(1.0)
      .perturb_in_place(x.view_mut(), &mut rng())
      .unwrap();
    let mean = x.mean().unwrap();
    let var = x.mapv(|v| (v - mean) * (v - mean) ).sum() / 3999.0;
    // sd should be 1% of 200
    assert!((mean - 200.0).abs() < 0.2, "mean {}", mean);
    assert!((var.sqrt() - 2.0).abs() < 0.2, "sd {}", var.sqrt());
  }

  #[test]
  fn zero_entries_use_reference_magnitude() {
    let mut x = Array2::zeros((1, 2000));
    Perturbation::new(10.0)
      .with_reference_magnitude(50.0)
      .with_negative_policy(NegativePolicy::Allow)
      .perturb_in_place(x.view_mut(), &mut rng())
      .unwrap();
    let sd = (x.mapv(|v| v * v ).sum() / 2000.0).sqrt();
    assert!((sd - 5.0).abs() < 0.5, "sd {}", sd);
  }

  #[test]
  fn clip_policy_never_goes_negative() {
    let mut x = Array2::from_elem((1, 500), 1.0);
    Perturbation::new(300.0)
      .with_negative_policy(NegativePolicy::Clip)
      .perturb_in_place(x.view_mut(), &mut rng())
      .unwrap();
    assert!(x.iter().all(|&v| v >= 0.0 ));
    assert!(x.iter().any(|&v| v == 0.0 ));
  }

  #[test]
  fn resample_policy_never_goes_negative() {
    let mut x = Array2::from_elem((1, 500), 1.0);
    Perturbation::new(100.0)
      .with_negative_policy(NegativePolicy::Resample)
      .perturb_in_place(x.view_mut(), &mut rng())
      .unwrap();
    assert!(x.iter().all(|&v| v >= 0.0 ));
  }

  #[test]
  fn reject_policy_fails_on_negative_draw() {
    let mut x = Array2::from_elem((1, 500), 1.0);
    let r = Perturbation::new(300.0)
      .with_negative_policy(NegativePolicy::Reject)
      .perturb_in_place(x.view_mut(), &mut rng());
    assert!(matches!(r, Err(Error::InvalidSample { attempts: 1, .. })));
  }
}
