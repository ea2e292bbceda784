use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::{OverflowPolicy, SinkOptions};
use crate::drain::{self, Output, Pipeline};
use crate::error::Result;
use crate::overflow::{Offer, OverflowController};
use crate::rotation::RoundRobin;
use crate::shard::Record;
use crate::stats::{Counters, SinkStats};
use crate::writer::BackingWriter;

/// Registry storage, shared with every sink it created so a closing sink
/// can remove its own entry.
pub(crate) type Entries = Mutex<HashMap<PathBuf, Sink>>;

/// Lifecycle of a sink. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
  /// Accepting records.
  Open,
  /// `close` is in progress; new records are refused.
  Closing,
  /// Drain loop finished and backing writer closed.
  Closed,
}

impl SinkState {
  const OPEN: u8 = 0;
  const CLOSING: u8 = 1;
  const CLOSED: u8 = 2;

  fn from_u8(v: u8) -> Self {
    match v {
      Self::OPEN => SinkState::Open,
      Self::CLOSING => SinkState::Closing,
      _ => SinkState::Closed,
    }
  }
}

struct SinkInner {
  options: SinkOptions,
  pipeline: Arc<Pipeline>,
  rotation: RoundRobin,
  overflow: OverflowController,
  state: AtomicU8,
  /// Present until the first close takes it. Held for the whole close so
  /// concurrent callers return only once the writer is closed.
  worker: Mutex<Option<JoinHandle<Option<Output>>>>,
  registry: Weak<Entries>,
}

/// Handle to an asynchronous log sink.
///
/// Cheap to clone; all clones share one shard pool, one drain thread and
/// one backing writer. Producers call [`append`](Sink::append) (or use the
/// `io::Write` impl) from any thread; the call never waits on I/O and never
/// fails. Under [`OverflowPolicy::Block`] it may wait for shard capacity.
///
/// # Example
///
/// ```no_run
/// use shardsink::{SinkOptions, SinkRegistry};
///
/// # fn main() -> shardsink::Result<()> {
/// let registry = SinkRegistry::new();
/// let sink = registry.open(SinkOptions::new("./log/app.log"))?;
///
/// sink.append(b"{\"level\":\"INFO\",\"msg\":\"started\"}\n");
///
/// // Drains every queued record, flushes and closes the file.
/// sink.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Sink {
  inner: Arc<SinkInner>,
}

impl Sink {
  /// Starts a drain thread over `writer`. Options must already be valid.
  pub(crate) fn start<W: BackingWriter>(options: SinkOptions, writer: W, registry: Weak<Entries>) -> Result<Self> {
    let pipeline = Arc::new(Pipeline::new(options.shard_count, options.shard_capacity));

    let backing: Box<dyn BackingWriter> = Box::new(writer);
    let out = BufWriter::with_capacity(options.buffer_size, backing);
    let worker = drain::spawn(pipeline.clone(), options.path.clone(), options.mirror_stdout, out)?;

    debug!(
      target: "shardsink",
      path = %options.path.display(),
      shards = pipeline.pool.shard_count(),
      capacity = pipeline.pool.capacity(),
      max_in_flight = options.max_in_flight(),
      overflow = ?options.overflow,
      "sink opened"
    );

    Ok(Self {
      inner: Arc::new(SinkInner {
        rotation: RoundRobin::new(options.shard_count),
        overflow: OverflowController::new(),
        options,
        pipeline,
        state: AtomicU8::new(SinkState::OPEN),
        worker: Mutex::new(Some(worker)),
        registry,
      }),
    })
  }

  /// Copies `record` into the sink. Always reports the full length.
  ///
  /// The bytes are copied before returning, so the caller may reuse its
  /// buffer immediately. Records offered after `close` began, or after the
  /// drain loop stopped, are counted as rejected and discarded.
  pub fn append(&self, record: &[u8]) -> usize {
    let inner = &*self.inner;
    let pool = &inner.pipeline.pool;
    let counters = &inner.pipeline.counters;

    if inner.state.load(Ordering::Acquire) != SinkState::OPEN || pool.is_closed() {
      Counters::bump(&counters.rejected);
      return record.len();
    }

    let idx = inner.rotation.select();
    let owned: Record = record.into();

    if inner.options.overflow == OverflowPolicy::Discard || drain::on_drain_thread() {
      match inner.overflow.offer(pool, &inner.rotation, idx, owned) {
        Offer::Enqueued => Counters::bump(&counters.enqueued),
        Offer::Dropped => {}
        Offer::DroppedWithMarker => {
          Counters::bump(&counters.enqueued);
          Counters::bump(&counters.markers);
        }
      }
    } else {
      match pool.push(idx, owned) {
        Ok(()) => Counters::bump(&counters.enqueued),
        Err(_) => Counters::bump(&counters.rejected),
      }
    }

    record.len()
  }

  /// Stops the sink: waits `close_grace`, signals the drain loop, waits for
  /// it to empty every shard, then closes the backing writer and leaves the
  /// registry.
  ///
  /// Idempotent. Only the first call does any work or can return an error;
  /// concurrent calls wait for it and return once the writer is closed.
  pub fn close(&self) -> Result<()> {
    let mut guard = self.inner.worker.lock();
    let Some(worker) = guard.take() else {
      return Ok(());
    };

    self.inner.state.store(SinkState::CLOSING, Ordering::Release);
    debug!(target: "shardsink", path = %self.path().display(), "closing sink");

    let grace = self.options().close_grace;
    if !grace.is_zero() {
      thread::sleep(grace);
    }

    let result = self.inner.shutdown(worker);
    self.inner.state.store(SinkState::CLOSED, Ordering::Release);
    self.deregister();
    drop(guard);

    debug!(target: "shardsink", path = %self.path().display(), stats = ?self.stats(), "sink closed");
    result
  }

  fn deregister(&self) {
    let Some(entries) = self.inner.registry.upgrade() else {
      return;
    };
    let mut entries = entries.lock();
    if entries.get(self.path()).is_some_and(|s| Sink::ptr_eq(s, self)) {
      entries.remove(self.path());
    }
  }

  /// A faulted sink reports `Closed`: its writer is already closed and it
  /// accepts nothing further.
  pub fn state(&self) -> SinkState {
    if self.inner.pipeline.counters.faulted.load(Ordering::Acquire) {
      return SinkState::Closed;
    }
    SinkState::from_u8(self.inner.state.load(Ordering::Acquire))
  }

  pub fn is_open(&self) -> bool {
    self.state() == SinkState::Open
  }

  pub fn path(&self) -> &Path {
    &self.inner.options.path
  }

  pub fn options(&self) -> &SinkOptions {
    &self.inner.options
  }

  pub fn shard_count(&self) -> usize {
    self.inner.pipeline.pool.shard_count()
  }

  /// Records queued but not yet written.
  pub fn pending(&self) -> usize {
    self.inner.pipeline.pool.total_pending()
  }

  /// Records shed by the overflow policy so far.
  pub fn dropped(&self) -> u64 {
    self.inner.overflow.dropped()
  }

  pub fn stats(&self) -> SinkStats {
    self.inner.pipeline.counters.snapshot(self.inner.overflow.dropped())
  }

  /// True if both handles refer to the same sink.
  pub fn ptr_eq(a: &Sink, b: &Sink) -> bool {
    Arc::ptr_eq(&a.inner, &b.inner)
  }
}

impl SinkInner {
  fn shutdown(&self, worker: JoinHandle<Option<Output>>) -> Result<()> {
    self.pipeline.signal.cancel();
    self.pipeline.pool.wake_consumers();

    let out = match worker.join() {
      Ok(Some(out)) => out,
      // Faulted: the drain thread already closed the writer.
      Ok(None) => return Ok(()),
      Err(_) => {
        // The loop body has its own panic boundary; reaching this means
        // the thread died outside it and took the writer with it.
        error!(target: "shardsink", path = %self.options.path.display(), "drain thread died, writer lost");
        return Ok(());
      }
    };

    self.close_output(out)
  }

  fn close_output(&self, mut out: Output) -> Result<()> {
    // Only non-empty if the last flush of the drain loop failed.
    if !out.buffer().is_empty() {
      if let Err(e) = out.flush() {
        Counters::bump(&self.pipeline.counters.write_errors);
        warn!(target: "shardsink", path = %self.options.path.display(), error = %e, "final flush failed");
      }
    }

    let (mut writer, _) = out.into_parts();
    writer.close()?;
    Ok(())
  }
}

impl Drop for SinkInner {
  fn drop(&mut self) {
    // Last handle gone without close: run the protocol minus the grace
    // period so queued records still reach the writer.
    if let Some(worker) = self.worker.get_mut().take() {
      self.state.store(SinkState::CLOSING, Ordering::Release);
      if let Err(e) = self.shutdown(worker) {
        warn!(target: "shardsink", path = %self.options.path.display(), error = %e, "close on drop failed");
      }
      self.state.store(SinkState::CLOSED, Ordering::Release);
    }
  }
}

impl fmt::Debug for Sink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Sink")
      .field("path", &self.path())
      .field("state", &self.state())
      .field("shards", &self.shard_count())
      .finish()
  }
}

/// Writes are appends. `flush` is a no-op: only the drain thread may
/// touch the file, and it flushes on its own schedule.
impl Write for Sink {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    Ok(self.append(buf))
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl Write for &Sink {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    Ok(self.append(buf))
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}
