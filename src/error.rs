use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Failed to create log directory {}: {source}", .path.display())]
  CreateDirectory { path: PathBuf, source: io::Error },

  #[error("Configuration Error: {0}")]
  Config(String),
}
