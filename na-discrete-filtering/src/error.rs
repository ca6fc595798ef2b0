
use na_core::ModelError;

use crate::assimilate::Phase;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Configuration(#[from] ConfigError),

  #[error("forecast of member {member} failed in cycle {cycle}")]
  Forecast {
    cycle: u64,
    member: usize,
    #[source]
    source: ModelError,
  },

  #[error("local gain solve for variable {variable} at cell {cell} is numerically unstable")]
  NumericalInstability {
    variable: usize,
    cell: usize,
    #[source]
    source: nla::Error,
  },

  /// Recoverable: the cell gets a zero correction.
  #[error("no observation within the localization radius of cell {cell} (variable {variable})")]
  LocalizationEmpty { variable: usize, cell: usize },

  #[error("no measurement for variable {variable} in cycle {cycle}")]
  MissingObservation { cycle: u64, variable: usize },

  #[error("no non-negative sample after {attempts} draws (last draw {value})")]
  InvalidSample { attempts: usize, value: f64 },

  #[error("assimilation cancelled in cycle {cycle}")]
  Cancelled { cycle: u64 },
}

impl Error {
  /// The time-loop phase this error belongs to.
  pub fn phase(&self) -> Phase {
    match self {
      &Error::Configuration(_) => Phase::Initialized,
      &Error::Forecast { .. } |
      &Error::InvalidSample { .. } |
      &Error::Cancelled { .. } => Phase::Forecasting,
      &Error::NumericalInstability { .. } |
      &Error::LocalizationEmpty { .. } |
      &Error::MissingObservation { .. } => Phase::Analyzing,
    }
  }
}

/// Problems detected before the time loop starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
  #[error("ensemble size must be at least 2 to estimate a covariance, got {count}")]
  EnsembleSize { count: usize },

  #[error("the cell coordinate map is empty")]
  NoCells,

  #[error("no state variables configured")]
  NoVariables,

  #[error("state variable `{name}` is configured twice")]
  DuplicateVariable { name: String },

  #[error("`{variable}`: initial state has {found} cells, expected {expected}")]
  StateLength { variable: String, expected: usize, found: usize },

  #[error("`{variable}`: {what} is {found:?}, expected {expected:?}")]
  OperatorShape {
    variable: String,
    what: &'static str,
    expected: (usize, usize),
    found: (usize, usize),
  },

  #[error("`{variable}`: observation cell {cell} is outside 0..{cells}")]
  ObservationCell { variable: String, cell: usize, cells: usize },

  #[error("`{variable}`: boundary cell {cell} is outside 0..{cells}")]
  BoundaryCell { variable: String, cell: usize, cells: usize },

  #[error("`{variable}`: observation-error covariance is not symmetric")]
  AsymmetricCovariance { variable: String },

  #[error("{what} must be finite and non-negative, got {value}")]
  InvalidParameter { what: String, value: f64 },

  #[error("{what} has {found} entries, expected one per variable ({expected})")]
  PerVariableLength { what: &'static str, expected: usize, found: usize },

  #[error("at least one forecast sub-step per cycle is required")]
  NoSolverRuns,

  #[error("ensemble shape {found:?} does not match the configuration {expected:?}")]
  EnsembleShape { expected: (usize, usize), found: (usize, usize) },
}
