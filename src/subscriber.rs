//! Lets a `tracing-subscriber` fmt layer write straight into a [`Sink`].
//!
//! The fmt layer renders each event into one buffer and hands it over in a
//! single `write_all`, so every event becomes exactly one record.
//!
//! ```no_run
//! use shardsink::{SinkOptions, SinkRegistry};
//! use tracing_subscriber::layer::SubscriberExt;
//!
//! # fn main() -> shardsink::Result<()> {
//! let registry = SinkRegistry::new();
//! let sink = registry.open(SinkOptions::new("./log/app.log"))?;
//!
//! let subscriber = tracing_subscriber::registry().with(shardsink::subscriber::json_layer(&sink));
//! tracing::subscriber::with_default(subscriber, || {
//!   tracing::info!(user = "ann", "logged in");
//! });
//!
//! sink.close()?;
//! # Ok(())
//! # }
//! ```

use tracing::Subscriber;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::sink::Sink;

impl<'a> MakeWriter<'a> for Sink {
  type Writer = &'a Sink;

  fn make_writer(&'a self) -> Self::Writer {
    self
  }
}

/// A JSON-per-line fmt layer writing into `sink`.
///
/// One object per line ending in `}\n` is the shape the overflow drop
/// marker knows how to extend.
pub fn json_layer<S>(sink: &Sink) -> fmt::Layer<S, JsonFields, Format<Json>, Sink>
where
  S: Subscriber + for<'span> LookupSpan<'span>,
{
  fmt::layer().json().with_writer(sink.clone())
}
