//! Failures raised by forward models.

use std::io;
use std::path::PathBuf;

pub type Result<T> = ::std::result::Result<T, ModelError>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
  /// The solver ran but reported failure.
  #[error("solver exited with {status}: {stderr}")]
  Process { status: String, stderr: String },

  /// The solver returned something that isn't a valid state.
  #[error("malformed state for `{variable}`: {reason}")]
  Malformed { variable: String, reason: String },

  #[error("{what} has {found} entries, expected {expected}")]
  Dimension { what: &'static str, expected: usize, found: usize },

  #[error("i/o error on {}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("forecast cancelled")]
  Cancelled,
}

impl ModelError {
  pub fn io<P>(path: P, source: io::Error) -> ModelError
    where P: Into<PathBuf>,
  {
    ModelError::Io {
      path: path.into(),
      source,
    }
  }
}
