//! Capturing log backend
//!
//! Wraps an `env_logger` logger and keeps the most recent formatted lines in
//! a bounded ring, so a running daemon can answer "show me the last N log
//! lines" without reading files.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock, PoisonError};

use log::{Log, Metadata, Record, SetLoggerError};

/// Default number of retained lines
pub const DEFAULT_CAPACITY: usize = 1000;

/// Global storage for the capturing logger
static LOGGER: OnceLock<CapturingLogger> = OnceLock::new();

/// Bounded buffer of formatted log lines, oldest first
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a line, dropping the oldest when full
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `n` lines, oldest first
    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Logger that forwards to `env_logger` and records into a [`LogRing`]
struct CapturingLogger {
    inner: env_logger::Logger,
    ring: LogRing,
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.matches(record) {
            return;
        }
        self.inner.log(record);
        self.ring.push(format_line(record));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

fn format_line(record: &Record) -> String {
    format!(
        "{} {:<5} {}: {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Install the capturing logger as the global logger
///
/// `default_filter` applies when `RUST_LOG` is not set. Fails if a logger
/// was already installed.
pub fn init_logging(default_filter: &str, capacity: usize) -> Result<(), SetLoggerError> {
    let logger = LOGGER.get_or_init(|| {
        let inner = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(default_filter),
        )
        .format_timestamp_millis()
        .build();
        CapturingLogger {
            inner,
            ring: LogRing::new(capacity),
        }
    });

    log::set_logger(logger)?;
    log::set_max_level(logger.inner.filter());
    Ok(())
}

/// The last `n` captured lines, oldest first
///
/// Empty when the capturing logger is not installed.
pub fn recent_logs(n: usize) -> Vec<String> {
    LOGGER.get().map(|l| l.ring.recent(n)).unwrap_or_default()
}
