//! Fixed set of bounded FIFO queues shared by producers and one consumer.
//!
//! Shards are fully independent: each has its own lock and condition
//! variables, so producers on different shards never contend. No operation
//! spans more than one shard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::signal::ShutdownSignal;

/// One formatted log line, owned by the sink once enqueued.
pub type Record = Box<[u8]>;

struct Shard {
  queue: Mutex<VecDeque<Record>>,
  /// Signalled when a record is pushed. Only the drain loop waits here.
  not_empty: Condvar,
  /// Signalled when a record is popped. Blocking producers wait here.
  not_full: Condvar,
}

impl Shard {
  fn new(capacity: usize) -> Self {
    Self {
      queue: Mutex::new(VecDeque::with_capacity(capacity)),
      not_empty: Condvar::new(),
      not_full: Condvar::new(),
    }
  }
}

pub struct ShardPool {
  shards: Box<[Shard]>,
  capacity: usize,
  /// Set once the consumer is gone. Producers must not wait after this.
  closed: AtomicBool,
}

impl ShardPool {
  /// Creates `shard_count` empty shards holding at most `capacity` records each.
  ///
  /// # Panics
  ///
  /// Panics if either argument is zero.
  pub fn new(shard_count: usize, capacity: usize) -> Self {
    assert!(shard_count > 0, "shard_count must be greater than zero");
    assert!(capacity > 0, "shard capacity must be greater than zero");

    Self {
      shards: (0..shard_count).map(|_| Shard::new(capacity)).collect(),
      capacity,
      closed: AtomicBool::new(false),
    }
  }

  pub fn shard_count(&self) -> usize {
    self.shards.len()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Indices wrap, so `idx + 1` is always a valid "next shard" query.
  #[inline]
  fn shard(&self, idx: usize) -> &Shard {
    &self.shards[idx % self.shards.len()]
  }

  /// Enqueues without waiting. Hands the record back if the shard is full
  /// or the pool is closed.
  pub fn try_push(&self, idx: usize, record: Record) -> Result<(), Record> {
    let shard = self.shard(idx);
    let mut queue = shard.queue.lock();
    if self.is_closed() || queue.len() >= self.capacity {
      return Err(record);
    }
    queue.push_back(record);
    shard.not_empty.notify_one();
    Ok(())
  }

  /// Enqueues, waiting for room as long as the pool stays open.
  ///
  /// Returns the record if the pool was closed before room appeared.
  pub fn push(&self, idx: usize, record: Record) -> Result<(), Record> {
    let shard = self.shard(idx);
    let mut queue = shard.queue.lock();
    loop {
      if self.is_closed() {
        return Err(record);
      }
      if queue.len() < self.capacity {
        break;
      }
      shard.not_full.wait(&mut queue);
    }
    queue.push_back(record);
    shard.not_empty.notify_one();
    Ok(())
  }

  /// Dequeues the oldest record of a shard without waiting.
  pub fn try_pop(&self, idx: usize) -> Option<Record> {
    let shard = self.shard(idx);
    let record = shard.queue.lock().pop_front();
    if record.is_some() {
      shard.not_full.notify_one();
    }
    record
  }

  /// Dequeues the oldest record of a shard, parking until one arrives.
  ///
  /// Returns `None` once `signal` is cancelled and the shard is empty.
  /// A record that is already queued is always returned first.
  pub fn pop_wait(&self, idx: usize, signal: &ShutdownSignal) -> Option<Record> {
    let shard = self.shard(idx);
    let mut queue = shard.queue.lock();
    loop {
      if let Some(record) = queue.pop_front() {
        drop(queue);
        shard.not_full.notify_one();
        return Some(record);
      }
      if signal.is_cancelled() {
        return None;
      }
      shard.not_empty.wait(&mut queue);
    }
  }

  /// Number of records waiting in a shard.
  pub fn pending(&self, idx: usize) -> usize {
    self.shard(idx).queue.lock().len()
  }

  /// Records waiting across all shards. Not a consistent snapshot.
  pub fn total_pending(&self) -> usize {
    self.shards.iter().map(|s| s.queue.lock().len()).sum()
  }

  /// Wakes a consumer parked in [`pop_wait`](Self::pop_wait) so it can
  /// re-check its shutdown signal.
  pub fn wake_consumers(&self) {
    for shard in self.shards.iter() {
      let _guard = shard.queue.lock();
      shard.not_empty.notify_all();
    }
  }

  /// Marks the pool as having no consumer and releases blocked producers.
  /// Queued records stay in place.
  pub fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
    for shard in self.shards.iter() {
      let _guard = shard.queue.lock();
      shard.not_full.notify_all();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}
