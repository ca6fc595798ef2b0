
pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  #[error("matrix is not square ({rows}x{cols})")]
  NotSquare { rows: usize, cols: usize },

  /// The pivot fell below the relative tolerance; the matrix is singular,
  /// indefinite or too ill-conditioned to factor.
  #[error("matrix is not numerically positive definite (pivot {pivot})")]
  NotPositiveDefinite { pivot: usize },

  #[error("right hand side has {found} rows, expected {expected}")]
  DimensionMismatch { expected: usize, found: usize },
}
