extern crate ndarray as nd;
extern crate num_traits;
extern crate thiserror;

pub use cholesky::*;
pub use error::{Error, Result};

pub mod cholesky;
pub mod error;
