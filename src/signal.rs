use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative shutdown token shared by a sink handle and its drain loop.
///
/// Cancelling only flips the flag. Waking a consumer parked on a shard is
/// the caller's job ([`ShardPool::wake_consumers`](crate::shard::ShardPool::wake_consumers)),
/// which must happen after `cancel` so the check-then-wait in the pool
/// cannot miss it.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
  cancelled: AtomicBool,
}

impl ShutdownSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}
