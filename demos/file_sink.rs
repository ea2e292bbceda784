//! Example: routing application logs through a shardsink
//!
//! This example demonstrates:
//! - Opening a file-backed sink through a registry
//! - Appending raw records from several threads
//! - Plugging the sink into `tracing` as a JSON layer
//! - Closing the sink so every queued record reaches the file

use std::thread;

use shardsink::{OverflowPolicy, SinkOptions, SinkRegistry};
use tracing_subscriber::layer::SubscriberExt;

fn main() -> shardsink::Result<()> {
  println!("=== shardsink File Example ===\n");

  // 1. Open a sink. A second open of the same path returns the same sink.
  let registry = SinkRegistry::new();
  let mut opts = SinkOptions::new("./example_logs/app.log");
  opts.shard_count = 16;
  opts.overflow = OverflowPolicy::Discard;

  let sink = registry.open(opts.clone())?;
  let again = registry.open(opts)?;
  assert!(shardsink::Sink::ptr_eq(&sink, &again));
  println!("✓ Opened {} with {} shards", sink.path().display(), sink.shard_count());

  // 2. Raw records from several producers
  println!("\n--- Appending From 4 Threads ---");
  let handles: Vec<_> = (0..4)
    .map(|t| {
      let sink = sink.clone();
      thread::spawn(move || {
        for i in 0..250 {
          sink.append(format!("{{\"worker\":{},\"seq\":{}}}\n", t, i).as_bytes());
        }
      })
    })
    .collect();
  for h in handles {
    h.join().expect("producer panicked");
  }
  println!("  ... (appended 1000 records)");

  // 3. tracing events rendered as JSON lines
  println!("\n--- Logging Through tracing ---");
  let subscriber = tracing_subscriber::registry().with(shardsink::subscriber::json_layer(&sink));
  tracing::subscriber::with_default(subscriber, || {
    tracing::info!(user = "ann", "logged in");
    tracing::warn!(attempts = 3, "password retry");
  });
  println!("✓ Emitted 2 tracing events");

  // 4. Close drains every shard, flushes and closes the file
  println!("\n--- Closing ---");
  registry.close_all()?;
  let stats = sink.stats();
  println!(
    "✓ Closed: enqueued={} written={} dropped={} flushes={}",
    stats.enqueued, stats.written, stats.dropped, stats.flushes
  );

  println!("\n=== Done ===");
  Ok(())
}
