//! The resource a drain loop appends to.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// A sequential, flushable, closable output.
///
/// Only the drain loop of the owning sink ever touches it, so
/// implementations need no internal locking. Rotation or compression, if
/// any, happen behind this interface.
pub trait BackingWriter: Write + Send + 'static {
  /// Releases the resource after the last flush. Called exactly once.
  fn close(&mut self) -> io::Result<()>;
}

impl BackingWriter for File {
  fn close(&mut self) -> io::Result<()> {
    self.sync_all()
  }
}

impl BackingWriter for io::Sink {
  fn close(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<W: BackingWriter + ?Sized> BackingWriter for Box<W> {
  fn close(&mut self) -> io::Result<()> {
    (**self).close()
  }
}

/// Opens `path` for appending, creating it and its parent directory.
///
/// Append mode keeps the file consistent when an external tool rotates or
/// truncates it underneath us.
pub fn open_append(path: &Path) -> Result<File> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    fs::create_dir_all(parent).map_err(|source| Error::CreateDirectory {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  let mut options = OpenOptions::new();
  options.create(true).append(true);

  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o644);
  }

  Ok(options.open(path)?)
}
