#![allow(dead_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use shardsink::{BackingWriter, SinkOptions, SinkRegistry};
use tempfile::TempDir;

pub struct TestEnv {
  pub registry: SinkRegistry,
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
  pub root: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    Self {
      registry: SinkRegistry::new(),
      _dir: dir,
      root,
    }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.root.join(name)
  }

  /// Small geometry, no close grace: tests should not depend on timing.
  pub fn options(&self, name: &str, shard_count: usize, shard_capacity: usize) -> SinkOptions {
    let mut opts = SinkOptions::new(self.path(name));
    opts.shard_count = shard_count;
    opts.shard_capacity = shard_capacity;
    opts.close_grace = Duration::ZERO;
    opts
  }
}

pub fn read_lines(path: &Path) -> Vec<String> {
  std::fs::read_to_string(path)
    .unwrap()
    .lines()
    .map(str::to_string)
    .collect()
}

/// Writer test double: records every write call separately.
#[derive(Clone, Default)]
pub struct Capture {
  writes: Arc<Mutex<Vec<Vec<u8>>>>,
  flushes: Arc<AtomicUsize>,
  closes: Arc<AtomicUsize>,
}

impl Capture {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn writes(&self) -> Vec<Vec<u8>> {
    self.writes.lock().clone()
  }

  pub fn bytes(&self) -> Vec<u8> {
    self.writes.lock().concat()
  }

  pub fn lines(&self) -> Vec<String> {
    String::from_utf8(self.bytes())
      .unwrap()
      .lines()
      .map(str::to_string)
      .collect()
  }

  pub fn flushes(&self) -> usize {
    self.flushes.load(Ordering::SeqCst)
  }

  pub fn closes(&self) -> usize {
    self.closes.load(Ordering::SeqCst)
  }
}

impl Write for Capture {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.writes.lock().push(buf.to_vec());
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    self.flushes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

impl BackingWriter for Capture {
  fn close(&mut self) -> io::Result<()> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// A latch the drain thread waits on inside `write`, simulating a stalled disk.
#[derive(Default)]
pub struct Gate {
  open: Mutex<bool>,
  cv: Condvar,
}

impl Gate {
  pub fn closed() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn open(&self) {
    *self.open.lock() = true;
    self.cv.notify_all();
  }

  fn wait(&self) {
    let mut open = self.open.lock();
    while !*open {
      self.cv.wait(&mut open);
    }
  }
}

/// Capture that blocks every write until its gate opens.
#[derive(Clone)]
pub struct GatedWriter {
  pub capture: Capture,
  pub gate: Arc<Gate>,
  /// Writes that have entered `write`, whether or not they returned.
  pub entered: Arc<AtomicUsize>,
}

impl GatedWriter {
  pub fn new(gate: Arc<Gate>) -> Self {
    Self {
      capture: Capture::new(),
      gate,
      entered: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn entered(&self) -> usize {
    self.entered.load(Ordering::SeqCst)
  }
}

impl Write for GatedWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.entered.fetch_add(1, Ordering::SeqCst);
    self.gate.wait();
    self.capture.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.capture.flush()
  }
}

impl BackingWriter for GatedWriter {
  fn close(&mut self) -> io::Result<()> {
    self.capture.close()
  }
}

/// Rejects every write and flush.
#[derive(Clone, Default)]
pub struct FailingWriter {
  pub closes: Arc<AtomicUsize>,
}

impl Write for FailingWriter {
  fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
    Err(io::Error::other("disk full"))
  }

  fn flush(&mut self) -> io::Result<()> {
    Err(io::Error::other("disk full"))
  }
}

impl BackingWriter for FailingWriter {
  fn close(&mut self) -> io::Result<()> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Panics on its first write, taking the drain loop down with it.
#[derive(Clone, Default)]
pub struct PanickingWriter {
  pub closes: Arc<AtomicUsize>,
}

impl Write for PanickingWriter {
  fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
    panic!("simulated writer fault");
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl BackingWriter for PanickingWriter {
  fn close(&mut self) -> io::Result<()> {
    self.closes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// Polls `cond` until it holds or a generous deadline passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
  let deadline = std::time::Instant::now() + Duration::from_secs(10);
  while std::time::Instant::now() < deadline {
    if cond() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
  cond()
}
