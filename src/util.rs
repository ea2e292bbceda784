use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between two reports of the same failure class.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Returns `./log/<process name>.log`.
pub fn default_log_path() -> PathBuf {
  PathBuf::from("./log").join(format!("{}.log", process_name()))
}

/// File name of the running executable as invoked (`argv[0]`).
pub fn process_name() -> String {
  std::env::args_os()
    .next()
    .as_deref()
    .and_then(|arg| Path::new(arg).file_name())
    .map(|name| name.to_string_lossy().into_owned())
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| "app".to_string())
}

/// Reports a recurring failure at most once per interval.
///
/// The drain loop hits the same backing-writer error on every record while
/// a disk is full; this keeps the diagnostic stream readable while still
/// counting every occurrence.
pub(crate) struct RateLimitedReporter {
  min_interval: Duration,
  last_report: Mutex<Option<Instant>>,
  /// Failures since the last emitted report.
  suppressed: AtomicU64,
  total: AtomicU64,
}

impl RateLimitedReporter {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_report: Mutex::new(None),
      suppressed: AtomicU64::new(0),
      total: AtomicU64::new(0),
    }
  }

  /// Records one failure. Returns true if it was reported.
  pub fn report(&self, path: &Path, what: &str, error: &dyn Display) -> bool {
    self.suppressed.fetch_add(1, Ordering::Relaxed);
    let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;

    let due = {
      let mut last = self.last_report.lock();
      let now = Instant::now();
      match *last {
        Some(at) if now.duration_since(at) < self.min_interval => false,
        _ => {
          *last = Some(now);
          true
        }
      }
    };

    if !due {
      return false;
    }

    let count = self.suppressed.swap(0, Ordering::Relaxed);
    if count > 1 {
      tracing::error!(
        target: "shardsink",
        path = %path.display(),
        error = %error,
        suppressed = count - 1,
        total,
        "{} (rate-limited)", what
      );
    } else {
      tracing::error!(target: "shardsink", path = %path.display(), error = %error, total, "{}", what);
    }
    true
  }
}

impl Default for RateLimitedReporter {
  fn default() -> Self {
    Self::new(DEFAULT_REPORT_INTERVAL)
  }
}
