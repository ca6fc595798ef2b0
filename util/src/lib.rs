//! Run plumbing around the filter: JSON persistence, measurement tables,
//! twin experiments and progress reporting.

extern crate ndarray as nd;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate pbr;
extern crate rand;
extern crate serde;
extern crate serde_json;
extern crate thiserror;
extern crate tracing;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use na_df::FilterHistory;

pub use data::{generate_twin, ObservationTable, ObservedVariable, Twin,
               TwinConfig};
pub use progress::CycleProgress;

pub mod data;
pub mod progress;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("I/O error on {}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed JSON in {}", path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("no measurements for variable `{name}`")]
  UnknownVariable { name: String },

  #[error(transparent)]
  Filter(#[from] na_df::Error),

  #[error(transparent)]
  Model(#[from] na_core::ModelError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
  move |source| Error::Io { path: path.to_owned(), source, }
}

pub fn write_json<T>(path: &Path, value: &T) -> Result<()>
  where T: Serialize,
{
  let file = File::create(path).map_err(io_error(path))?;
  let mut out = BufWriter::new(file);
  serde_json::to_writer_pretty(&mut out, value)
    .map_err(|source| Error::Json { path: path.to_owned(), source, })?;
  out.write_all(b"\n").map_err(io_error(path))?;
  out.flush().map_err(io_error(path))?;
  Ok(())
}

pub fn read_json<T>(path: &Path) -> Result<T>
  where T: DeserializeOwned,
{
  let file = File::open(path).map_err(io_error(path))?;
  serde_json::from_reader(BufReader::new(file))
    .map_err(|source| Error::Json { path: path.to_owned(), source, })
}

/// Writes the mean history; floats come back bit-exact through
/// `load_history`.
pub fn save_history(path: &Path, history: &FilterHistory) -> Result<()> {
  write_json(path, history)?;
  debug!(path = %path.display(), columns = history.len(), "saved history");
  Ok(())
}

pub fn load_history(path: &Path) -> Result<FilterHistory> {
  read_json(path)
}
