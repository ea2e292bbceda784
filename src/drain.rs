//! The single consumer of a sink.
//!
//! One thread per sink visits shards in a fixed rotation, writes each
//! record through a buffered writer and decides when to flush. It is the
//! only code that ever touches the backing writer.

use std::any::Any;
use std::cell::Cell;
use std::io::{self, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::rotation::DrainCursor;
use crate::shard::ShardPool;
use crate::signal::ShutdownSignal;
use crate::stats::Counters;
use crate::util::RateLimitedReporter;
use crate::writer::BackingWriter;

/// Buffered output owned by the drain thread and handed back when it exits.
pub(crate) type Output = BufWriter<Box<dyn BackingWriter>>;

thread_local! {
  static ON_DRAIN_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// True on any sink's drain thread. Appends made here must never block,
/// or the consumer could end up waiting on itself.
pub(crate) fn on_drain_thread() -> bool {
  ON_DRAIN_THREAD.with(Cell::get)
}

/// State shared between a sink handle, its producers and its drain thread.
pub(crate) struct Pipeline {
  pub pool: ShardPool,
  pub signal: ShutdownSignal,
  pub counters: Counters,
}

impl Pipeline {
  pub fn new(shard_count: usize, shard_capacity: usize) -> Self {
    Self {
      pool: ShardPool::new(shard_count, shard_capacity),
      signal: ShutdownSignal::new(),
      counters: Counters::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
  /// Park on the current shard until a record or shutdown arrives.
  Active,
  /// Shutdown requested: sweep shards without waiting until a full
  /// rotation comes up empty.
  Draining,
}

/// Secondary copy of every record, usually standard output.
pub(crate) type Mirror = Box<dyn Write>;

pub(crate) struct DrainLoop<'a> {
  pool: &'a ShardPool,
  signal: &'a ShutdownSignal,
  counters: &'a Counters,
  path: &'a Path,
  mirror: Option<Mirror>,
  failures: RateLimitedReporter,
  mirror_failures: RateLimitedReporter,
  /// Bytes were written since the last flush.
  dirty: bool,
}

impl<'a> DrainLoop<'a> {
  pub fn new(pipeline: &'a Pipeline, path: &'a Path, mirror: Option<Mirror>) -> Self {
    Self {
      pool: &pipeline.pool,
      signal: &pipeline.signal,
      counters: &pipeline.counters,
      path,
      mirror,
      failures: RateLimitedReporter::default(),
      mirror_failures: RateLimitedReporter::default(),
      dirty: false,
    }
  }

  /// Runs until shutdown is signalled and every shard has been emptied.
  pub fn run<W: Write>(&mut self, out: &mut W) {
    let shard_count = self.pool.shard_count();
    let mut cursor = DrainCursor::new(shard_count);
    let mut state = DrainState::Active;
    let mut empty_visits = 0;

    loop {
      let idx = cursor.current();

      match state {
        DrainState::Active => match self.pool.pop_wait(idx, self.signal) {
          Some(record) => self.emit(out, &record),
          None => {
            debug!(target: "shardsink", path = %self.path.display(), "shutdown signalled, draining shards");
            state = DrainState::Draining;
            continue;
          }
        },
        DrainState::Draining => match self.pool.try_pop(idx) {
          Some(record) => {
            empty_visits = 0;
            self.emit(out, &record);
          }
          None => {
            empty_visits += 1;
            if empty_visits >= shard_count {
              self.flush(out);
              debug!(target: "shardsink", path = %self.path.display(), "all shards drained");
              return;
            }
          }
        },
      }

      cursor.advance();

      // Known pending work on the next shard means more writes are coming
      // right away; otherwise we may be about to park, so push bytes out now.
      if self.dirty && self.pool.pending(cursor.current()) == 0 {
        self.flush(out);
      }
    }
  }

  fn emit<W: Write>(&mut self, out: &mut W, record: &[u8]) {
    match out.write_all(record) {
      Ok(()) => Counters::bump(&self.counters.written),
      Err(e) => {
        Counters::bump(&self.counters.write_errors);
        self.failures.report(self.path, "failed to write log record", &e);
      }
    }
    self.dirty = true;

    // Best effort: a broken mirror is counted but never affects the file.
    if let Some(mirror) = self.mirror.as_mut() {
      if let Err(e) = mirror.write_all(record) {
        Counters::bump(&self.counters.mirror_errors);
        self.mirror_failures.report(self.path, "failed to mirror log record", &e);
      }
    }
  }

  fn flush<W: Write>(&mut self, out: &mut W) {
    if !self.dirty {
      return;
    }
    self.dirty = false;

    match out.flush() {
      Ok(()) => Counters::bump(&self.counters.flushes),
      Err(e) => {
        Counters::bump(&self.counters.write_errors);
        self.failures.report(self.path, "failed to flush log buffer", &e);
      }
    }
  }
}

/// Starts the drain thread for `pipeline`.
///
/// The loop body runs behind a panic boundary. A fault stops intake, closes
/// the backing writer without flushing it, marks the sink as faulted and
/// ends that loop for good; the join handle then yields `None`. On a normal
/// exit the pool is closed so blocked producers are released, and the output
/// is handed back for the owner to flush and close.
pub(crate) fn spawn(
  pipeline: Arc<Pipeline>,
  path: PathBuf,
  mirror_stdout: bool,
  mut out: Output,
) -> io::Result<JoinHandle<Option<Output>>> {
  thread::Builder::new().name("shardsink-drain".into()).spawn(move || {
    ON_DRAIN_THREAD.with(|flag| flag.set(true));

    let mirror = mirror_stdout.then(|| Box::new(io::stdout()) as Mirror);
    let mut drain = DrainLoop::new(&pipeline, &path, mirror);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| drain.run(&mut out)));

    let Err(payload) = outcome else {
      pipeline.pool.close();
      return Some(out);
    };

    pipeline.pool.close();
    error!(
      target: "shardsink",
      path = %path.display(),
      pending = pipeline.pool.total_pending(),
      "drain loop panicked, sink stopped: {}",
      panic_message(payload.as_ref())
    );
    close_faulted(out, &path);
    pipeline.counters.faulted.store(true, Ordering::Release);
    None
  })
}

/// Releases the writer of a faulted loop. Buffered bytes are discarded: the
/// writer already panicked once and is not written to again.
fn close_faulted(out: Output, path: &Path) {
  let (mut writer, _) = out.into_parts();
  match panic::catch_unwind(AssertUnwindSafe(|| writer.close())) {
    Ok(Ok(())) => {}
    Ok(Err(e)) => warn!(target: "shardsink", path = %path.display(), error = %e, "closing faulted writer failed"),
    Err(_) => error!(target: "shardsink", path = %path.display(), "faulted writer panicked on close"),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.as_str()
  } else {
    "unknown panic payload"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Records each write call and flush separately.
  #[derive(Default)]
  struct Capture {
    writes: Vec<Vec<u8>>,
    flushes: usize,
    fail_writes: bool,
  }

  impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      if self.fail_writes {
        return Err(io::Error::other("disk full"));
      }
      self.writes.push(buf.to_vec());
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      self.flushes += 1;
      Ok(())
    }
  }

  fn filled(shard_count: usize, records: &[&str]) -> Pipeline {
    let pipeline = Pipeline::new(shard_count, 16);
    for (i, r) in records.iter().enumerate() {
      pipeline.pool.try_push(i % shard_count, r.as_bytes().into()).unwrap();
    }
    pipeline
  }

  fn lines(capture: &Capture) -> Vec<String> {
    capture.writes.iter().map(|w| String::from_utf8(w.clone()).unwrap()).collect()
  }

  #[test]
  fn test_drains_everything_in_rotation_order_after_cancel() {
    let pipeline = filled(4, &["A", "B", "C", "D", "E", "F", "G", "H"]);
    pipeline.signal.cancel();

    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);

    assert_eq!(lines(&out), ["A", "B", "C", "D", "E", "F", "G", "H"]);
    assert_eq!(pipeline.pool.total_pending(), 0);
    assert_eq!(pipeline.counters.written.load(Ordering::Relaxed), 8);
    assert!(out.flushes >= 1);
  }

  #[test]
  fn test_draining_skips_gaps() {
    let pipeline = Pipeline::new(4, 4);
    pipeline.pool.try_push(1, b"one"[..].into()).unwrap();
    pipeline.pool.try_push(3, b"three"[..].into()).unwrap();
    pipeline.signal.cancel();

    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);

    assert_eq!(lines(&out), ["one", "three"]);
  }

  #[test]
  fn test_no_flush_when_nothing_written() {
    let pipeline = Pipeline::new(2, 2);
    pipeline.signal.cancel();

    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);

    assert!(out.writes.is_empty());
    assert_eq!(out.flushes, 0);
  }

  #[test]
  fn test_flush_deferred_while_next_shard_has_work() {
    // Both shards hold work: after A the next shard (1) is non-empty, so no
    // flush; after B the next shard (0) still holds C, so no flush; after C
    // shard 1 is empty and the loop flushes once.
    let pipeline = filled(2, &["A", "B", "C"]);
    pipeline.signal.cancel();

    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);

    assert_eq!(lines(&out), ["A", "B", "C"]);
    assert_eq!(out.flushes, 1);
  }

  #[test]
  fn test_write_errors_are_counted_not_propagated() {
    let pipeline = filled(2, &["A", "B", "C"]);
    pipeline.signal.cancel();

    let mut out = Capture {
      fail_writes: true,
      ..Default::default()
    };
    DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);

    assert_eq!(pipeline.counters.write_errors.load(Ordering::Relaxed), 3);
    assert_eq!(pipeline.counters.written.load(Ordering::Relaxed), 0);
    assert_eq!(pipeline.pool.total_pending(), 0);
  }

  #[test]
  fn test_active_loop_consumes_live_records() {
    let pipeline = Arc::new(Pipeline::new(2, 4));

    let consumer = {
      let pipeline = pipeline.clone();
      thread::spawn(move || {
        let mut out = Capture::default();
        DrainLoop::new(&pipeline, Path::new("t.log"), None).run(&mut out);
        out
      })
    };

    for (i, r) in ["x", "y", "z"].iter().enumerate() {
      pipeline.pool.push(i % 2, r.as_bytes().into()).unwrap();
    }
    while pipeline.pool.total_pending() > 0 {
      thread::yield_now();
    }

    pipeline.signal.cancel();
    pipeline.pool.wake_consumers();

    let out = consumer.join().unwrap();
    assert_eq!(lines(&out), ["x", "y", "z"]);
  }

  #[test]
  fn test_panic_message_extraction() {
    let payload: Box<dyn Any + Send> = Box::new("boom");
    assert_eq!(panic_message(payload.as_ref()), "boom");
    let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
    assert_eq!(panic_message(payload.as_ref()), "bang");
    let payload: Box<dyn Any + Send> = Box::new(42u8);
    assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
  }

  #[test]
  fn test_drain_thread_flag() {
    assert!(!on_drain_thread());

    let pipeline = Arc::new(Pipeline::new(1, 1));
    pipeline.signal.cancel();
    let out: Output = BufWriter::new(Box::new(io::sink()) as Box<dyn BackingWriter>);
    let handle = spawn(pipeline.clone(), "t.log".into(), false, out).unwrap();
    assert!(handle.join().unwrap().is_some());

    assert!(pipeline.pool.is_closed());
    assert!(!pipeline.counters.faulted.load(Ordering::Acquire));
  }

  struct BrokenPipe;

  impl Write for BrokenPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
      Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn test_mirror_errors_are_counted_and_file_unaffected() {
    let pipeline = filled(2, &["A", "B", "C"]);
    pipeline.signal.cancel();

    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), Some(Box::new(BrokenPipe))).run(&mut out);

    assert_eq!(lines(&out), ["A", "B", "C"]);
    assert_eq!(pipeline.counters.mirror_errors.load(Ordering::Relaxed), 3);
    assert_eq!(pipeline.counters.write_errors.load(Ordering::Relaxed), 0);
  }

  #[test]
  fn test_mirror_receives_every_record() {
    #[derive(Clone, Default)]
    struct Shared(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Shared {
      fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
      }

      fn flush(&mut self) -> io::Result<()> {
        Ok(())
      }
    }

    let pipeline = filled(2, &["x\n", "y\n"]);
    pipeline.signal.cancel();

    let mirror = Shared::default();
    let mut out = Capture::default();
    DrainLoop::new(&pipeline, Path::new("t.log"), Some(Box::new(mirror.clone()))).run(&mut out);

    assert_eq!(&*mirror.0.lock(), b"x\ny\n");
    assert_eq!(pipeline.counters.mirror_errors.load(Ordering::Relaxed), 0);
  }

  /// Panics on flush, closes cleanly.
  struct Exploding {
    closes: Arc<std::sync::atomic::AtomicUsize>,
  }

  impl Write for Exploding {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      panic!("flush exploded");
    }
  }

  impl BackingWriter for Exploding {
    fn close(&mut self) -> io::Result<()> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[test]
  fn test_fault_closes_writer_on_drain_thread() {
    let closes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let pipeline = Arc::new(Pipeline::new(2, 4));
    pipeline.pool.try_push(0, b"boom\n"[..].into()).unwrap();

    let writer = Exploding { closes: closes.clone() };
    let out: Output = BufWriter::new(Box::new(writer) as Box<dyn BackingWriter>);
    let handle = spawn(pipeline.clone(), "t.log".into(), false, out).unwrap();

    assert!(handle.join().unwrap().is_none());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(pipeline.pool.is_closed());
    assert!(pipeline.counters.faulted.load(Ordering::Acquire));
  }
}
