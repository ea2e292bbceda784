use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util;

/// Defines what a producer does when its selected shard is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
  /// Wait for the drain loop to make room. No record is ever lost while
  /// the sink is open, but a stalled backing writer stalls producers too.
  #[default]
  Block,

  /// Drop the record and count it. Every 100th drop enqueues a marker
  /// record carrying the cumulative drop count.
  Discard,
}

#[derive(Debug, Clone)]
pub struct SinkOptions {
  /// Output file, and the identity the registry de-duplicates on.
  /// Default: `./log/<process name>.log`.
  pub path: PathBuf,

  // --- Shard Pool ---
  /// Number of independent queues producers are spread across.
  /// Default: 256.
  pub shard_count: usize,

  /// Maximum pending records per shard.
  /// Default: 1024.
  pub shard_capacity: usize,

  // --- Behavior ---
  pub overflow: OverflowPolicy,

  /// Copy every written record to standard output as well.
  pub mirror_stdout: bool,

  /// Size of the in-memory buffer in front of the backing writer.
  /// `0` disables buffering. Default: 256 KB.
  pub buffer_size: usize,

  /// Pause before shutdown is signalled, letting appends that already
  /// passed the open check land in a shard. Not a correctness guarantee.
  /// Default: 2 ms.
  pub close_grace: Duration,
}

impl Default for SinkOptions {
  fn default() -> Self {
    Self {
      path: util::default_log_path(),
      shard_count: 256,
      shard_capacity: 1024,
      overflow: OverflowPolicy::Block,
      mirror_stdout: false,
      buffer_size: 256 * 1024, // 256 KB
      close_grace: Duration::from_millis(2),
    }
  }
}

impl SinkOptions {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  /// Upper bound on records buffered in the shard pool.
  pub fn max_in_flight(&self) -> usize {
    self.shard_count.saturating_mul(self.shard_capacity)
  }

  pub fn validate(&self) -> Result<()> {
    if self.path.as_os_str().is_empty() {
      return Err(Error::Config("Sink path cannot be empty".into()));
    }
    if self.shard_count == 0 {
      return Err(Error::Config("shard_count must be greater than zero".into()));
    }
    if self.shard_capacity == 0 {
      return Err(Error::Config("shard_capacity must be greater than zero".into()));
    }
    Ok(())
  }
}
