//! # shardsink
//!
//! `shardsink` is an asynchronous log-record sink. Any number of threads
//! append formatted log lines; one background thread per output writes them
//! to a file (or any [`BackingWriter`]) so producers never wait on disk I/O.
//!
//! ## Key Features
//!
//! * **Sharded queues**: Producers are spread round-robin over N bounded
//!   shards, each with its own lock, so they rarely contend.
//! * **Single writer**: Only the drain thread touches the backing writer;
//!   records can never interleave inside the file.
//! * **Amortized flushing**: The buffer is flushed when the next shard in
//!   rotation is empty, not after every record.
//! * **Overflow policy**: Block producers when full, or drop and leave a
//!   marker with the cumulative drop count every 100 drops.
//! * **Clean shutdown**: `close` drains every queued record before the
//!   writer is closed.
//! * **De-duplication**: A [`SinkRegistry`] hands out one sink per path.
//!
//! ## Ordering
//!
//! Records are ordered within a shard. Across shards the drain order follows
//! the same rotation producers use, so a single producer sees its records
//! written in order; concurrent producers only get per-shard FIFO.
//!
//! ## Example
//!
//! ```no_run
//! use shardsink::{OverflowPolicy, SinkOptions, SinkRegistry};
//!
//! # fn main() -> shardsink::Result<()> {
//! let registry = SinkRegistry::new();
//!
//! let mut opts = SinkOptions::new("./log/app.log");
//! opts.overflow = OverflowPolicy::Discard;
//! let sink = registry.open(opts)?;
//!
//! sink.append(b"{\"level\":\"INFO\",\"msg\":\"hello\"}\n");
//!
//! sink.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod drain;
mod error;
mod registry;
mod signal;
mod sink;
mod stats;
mod util;

pub mod overflow;
pub mod rotation;
pub mod shard;
pub mod writer;

#[cfg(feature = "subscriber")]
pub mod subscriber;

// Re-exports for the flat public API
pub use config::{OverflowPolicy, SinkOptions};
pub use error::{Error, Result};
pub use registry::SinkRegistry;
pub use signal::ShutdownSignal;
pub use sink::{Sink, SinkState};
pub use stats::SinkStats;
pub use util::default_log_path;
pub use writer::BackingWriter;
