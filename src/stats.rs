use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Point-in-time view of a sink's counters.
///
/// Counters are read one by one, so a snapshot taken while producers are
/// active is not atomic across fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
  /// Records accepted into a shard (drop markers included).
  pub enqueued: u64,
  /// Records handed to the backing writer without error.
  pub written: u64,
  /// Records shed by the overflow policy.
  pub dropped: u64,
  /// Drop markers that made it into a shard.
  pub markers: u64,
  /// Appends refused because the sink was closing or its drain loop had stopped.
  pub rejected: u64,
  /// Failed writes or flushes against the backing writer.
  pub write_errors: u64,
  /// Failed copies to standard output. Never affects the file.
  pub mirror_errors: u64,
  /// Successful flushes of the output buffer.
  pub flushes: u64,
  /// The drain loop panicked and was shut down.
  pub faulted: bool,
}

/// Shared, lock-free counters behind [`SinkStats`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
  pub enqueued: AtomicU64,
  pub written: AtomicU64,
  pub markers: AtomicU64,
  pub rejected: AtomicU64,
  pub write_errors: AtomicU64,
  pub mirror_errors: AtomicU64,
  pub flushes: AtomicU64,
  pub faulted: AtomicBool,
}

impl Counters {
  #[inline]
  pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// `dropped` lives in the overflow controller and is passed in.
  pub fn snapshot(&self, dropped: u64) -> SinkStats {
    SinkStats {
      enqueued: self.enqueued.load(Ordering::Relaxed),
      written: self.written.load(Ordering::Relaxed),
      dropped,
      markers: self.markers.load(Ordering::Relaxed),
      rejected: self.rejected.load(Ordering::Relaxed),
      write_errors: self.write_errors.load(Ordering::Relaxed),
      mirror_errors: self.mirror_errors.load(Ordering::Relaxed),
      flushes: self.flushes.load(Ordering::Relaxed),
      faulted: self.faulted.load(Ordering::Acquire),
    }
  }
}
