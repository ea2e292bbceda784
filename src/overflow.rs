//! Load shedding for [`OverflowPolicy::Discard`](crate::OverflowPolicy::Discard).
//!
//! A full shard drops the record instead of blocking the producer. Drops are
//! counted, and every [`DROP_MARKER_INTERVAL`]th drop tries to enqueue a copy
//! of the dropped record annotated with the running count, so sustained loss
//! shows up in the log itself.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::rotation::RoundRobin;
use crate::shard::{Record, ShardPool};

/// One marker is synthesized per this many drops.
pub const DROP_MARKER_INTERVAL: u64 = 100;

/// Name of the field the drop count is written under.
pub const DROP_COUNT_FIELD: &str = "dropped";

/// What happened to an offered record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
  Enqueued,
  Dropped,
  /// Dropped, and a drop marker made it into a shard.
  DroppedWithMarker,
}

#[derive(Debug, Default)]
pub(crate) struct OverflowController {
  dropped: AtomicU64,
}

impl OverflowController {
  pub fn new() -> Self {
    Self::default()
  }

  /// Counts one drop. Returns the marker to enqueue when the new count
  /// lands on a marker boundary.
  pub fn register_drop(&self, record: &[u8]) -> Option<Record> {
    let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
    if count % DROP_MARKER_INTERVAL == 0 {
      Some(annotate_drop_count(record, count).into_boxed_slice())
    } else {
      None
    }
  }

  /// Non-blocking enqueue into `idx`. On a full shard the record is
  /// dropped; a due marker gets exactly one non-blocking attempt on the
  /// next shard the distributor hands out.
  pub fn offer(&self, pool: &ShardPool, rotation: &RoundRobin, idx: usize, record: Record) -> Offer {
    let record = match pool.try_push(idx, record) {
      Ok(()) => return Offer::Enqueued,
      Err(record) => record,
    };

    match self.register_drop(&record) {
      Some(marker) => match pool.try_push(rotation.select(), marker) {
        Ok(()) => Offer::DroppedWithMarker,
        Err(_) => Offer::Dropped,
      },
      None => Offer::Dropped,
    }
  }

  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }
}

/// Appends `count` to a record as a trailing field.
///
/// A record ending in `}\n` is treated as a JSON object and gets
/// `,"dropped":<count>` before the closing brace. Anything else gets
/// ` dropped=<count>` before its trailing newline.
pub fn annotate_drop_count(record: &[u8], count: u64) -> Vec<u8> {
  let mut out = Vec::with_capacity(record.len() + DROP_COUNT_FIELD.len() + 24);

  if let Some(body) = record.strip_suffix(b"}\n") {
    out.extend_from_slice(body);
    let empty_object = body.iter().rev().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');
    if !empty_object {
      out.push(b',');
    }
    out.extend_from_slice(format!("\"{}\":{}}}\n", DROP_COUNT_FIELD, count).as_bytes());
  } else {
    out.extend_from_slice(record.strip_suffix(b"\n").unwrap_or(record));
    out.extend_from_slice(format!(" {}={}\n", DROP_COUNT_FIELD, count).as_bytes());
  }

  out
}
