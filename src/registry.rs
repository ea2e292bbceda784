//! One live sink per output path.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::SinkOptions;
use crate::error::{Error, Result};
use crate::sink::{Entries, Sink};
use crate::writer::{self, BackingWriter};

/// Explicit process-wide context that de-duplicates sinks by path.
///
/// Two loggers pointed at the same file must share one drain thread, or
/// their writes would interleave inside the file. Construct one registry at
/// startup and hand clones to whatever opens sinks. The lock is only taken
/// when sinks are opened or closed, never on the append path.
///
/// Identity is the configured path as written: `log/a.log` and
/// `./log/a.log` are different entries.
#[derive(Clone, Default)]
pub struct SinkRegistry {
  entries: Arc<Entries>,
}

impl SinkRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the open sink for `options.path`, or starts a file-backed one.
  ///
  /// When a sink already exists its options win; the ones passed here are
  /// ignored.
  ///
  /// # Errors
  ///
  /// Returns an error if the options are invalid, the parent directory
  /// cannot be created, the file cannot be opened, or the drain thread
  /// cannot be spawned.
  pub fn open(&self, options: SinkOptions) -> Result<Sink> {
    self.open_with(options, writer::open_append)
  }

  /// Like [`open`](Self::open) with a caller-supplied backing writer.
  ///
  /// `make_writer` is only invoked when a new sink is actually created.
  pub fn open_with<W, F>(&self, options: SinkOptions, make_writer: F) -> Result<Sink>
  where
    W: BackingWriter,
    F: FnOnce(&Path) -> Result<W>,
  {
    let mut entries = self.entries.lock();

    if let Some(existing) = entries.get(&options.path) {
      if existing.is_open() {
        debug!(target: "shardsink", path = %options.path.display(), "reusing open sink");
        return Ok(existing.clone());
      }
    }

    options.validate()?;
    let writer = make_writer(&options.path)?;

    let sink = Sink::start(options, writer, Arc::downgrade(&self.entries))?;
    // A still-closing predecessor is replaced here; it only removes entries
    // that point at itself.
    entries.insert(sink.path().to_path_buf(), sink.clone());
    Ok(sink)
  }

  /// The registered sink for `path`, if any.
  pub fn get(&self, path: impl AsRef<Path>) -> Option<Sink> {
    self.entries.lock().get(path.as_ref()).cloned()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.lock().is_empty()
  }

  /// Closes every registered sink. Returns the first close error after
  /// attempting all of them.
  pub fn close_all(&self) -> Result<()> {
    let sinks: Vec<Sink> = self.entries.lock().values().cloned().collect();

    let mut first_error: Option<Error> = None;
    for sink in sinks {
      if let Err(e) = sink.close() {
        first_error.get_or_insert(e);
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
