//! Shard selection for producers and the drain loop.
//!
//! Both sides walk the same fixed modular rotation `0, 1, .., N-1, 0, ..`.
//! With a single producer and no drops the two stay in lockstep, so the
//! consumer finds each record exactly where it expects it. Under concurrent
//! producers the shared counter is racy: it only has to spread
//! load, not order it.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Producer-side distributor: hands out shard indices round-robin.
pub struct RoundRobin {
  next: AtomicUsize,
  shard_count: usize,
}

impl RoundRobin {
  /// # Panics
  ///
  /// Panics if `shard_count` is zero.
  pub fn new(shard_count: usize) -> Self {
    assert!(shard_count > 0, "shard_count must be greater than zero");
    Self {
      next: AtomicUsize::new(0),
      shard_count,
    }
  }

  /// Returns the shard the next write should target, in `0..shard_count`.
  #[inline]
  pub fn select(&self) -> usize {
    self.next.fetch_add(1, Ordering::Relaxed) % self.shard_count
  }
}

/// Consumer-side position in the rotation. Owned by the drain loop alone.
#[derive(Debug, Clone, Copy)]
pub struct DrainCursor {
  idx: usize,
  shard_count: usize,
}

impl DrainCursor {
  pub fn new(shard_count: usize) -> Self {
    assert!(shard_count > 0, "shard_count must be greater than zero");
    Self { idx: 0, shard_count }
  }

  #[inline]
  pub fn current(&self) -> usize {
    self.idx
  }

  /// The shard that will be visited after the current one.
  #[inline]
  pub fn peek_next(&self) -> usize {
    (self.idx + 1) % self.shard_count
  }

  #[inline]
  pub fn advance(&mut self) {
    self.idx = self.peek_next();
  }
}
