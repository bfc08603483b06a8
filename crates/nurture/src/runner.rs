//! Background nurturing loop
//!
//! [`NurtureRunner`] owns at most one worker thread. The worker runs a cycle,
//! then sleeps for the configured interval (or a backoff after failures)
//! until the next one. Stopping is observed between cycles: an in-flight
//! cycle always completes and saves.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::{CycleOutcome, NurtureEngine};
use crate::error::NurtureError;

/// First retry delay after a failed cycle
const BACKOFF_BASE_SECS: u64 = 60;

/// Longest delay between failed cycles
const BACKOFF_MAX_SECS: u64 = 1800;

/// Delay before retrying after `consecutive_errors` failed cycles in a row
///
/// Doubles from one minute and is capped at 30 minutes. Zero errors means no
/// backoff.
pub fn backoff_delay(consecutive_errors: u32) -> Duration {
    if consecutive_errors == 0 {
        return Duration::ZERO;
    }
    let exponent = (consecutive_errors - 1).min(16);
    let secs = BACKOFF_BASE_SECS.saturating_mul(1u64 << exponent);
    Duration::from_secs(secs.min(BACKOFF_MAX_SECS))
}

/// Cooperative stop signal for the worker thread
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `timeout`, waking early on cancel
    ///
    /// Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Point-in-time view of the loop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunnerStatus {
    pub running: bool,
    pub interval_hours: Option<u64>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string())
        };

        writeln!(f, "Running:            {}", if self.running { "yes" } else { "no" })?;
        if let Some(hours) = self.interval_hours {
            writeln!(f, "Interval:           {} hour(s)", hours)?;
        }
        writeln!(f, "Last run:           {}", when(self.last_run))?;
        writeln!(f, "Last success:       {}", when(self.last_success))?;
        if self.running {
            writeln!(f, "Next run:           {}", when(self.next_run))?;
        }
        writeln!(f, "Total runs:         {}", self.total_runs)?;
        writeln!(f, "Errors:             {}", self.error_count)?;
        writeln!(f, "Consecutive errors: {}", self.consecutive_errors)?;
        if let Some(err) = &self.last_error {
            writeln!(f, "Last error:         {}", err)?;
        }
        Ok(())
    }
}

impl RunnerStatus {
    fn record(&mut self, at: DateTime<Utc>, result: &Result<CycleOutcome, NurtureError>) {
        self.last_run = Some(at);
        self.total_runs += 1;
        match result {
            Ok(_) => {
                self.last_success = Some(at);
                self.last_error = None;
                self.consecutive_errors = 0;
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.error_count += 1;
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
            }
        }
    }
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop control over the periodic nurturing loop
pub struct NurtureRunner {
    engine: Arc<NurtureEngine>,
    status: Arc<Mutex<RunnerStatus>>,
    worker: Mutex<Option<Worker>>,
}

impl NurtureRunner {
    pub fn new(engine: Arc<NurtureEngine>) -> Self {
        Self {
            engine,
            status: Arc::new(Mutex::new(RunnerStatus::default())),
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<NurtureEngine> {
        &self.engine
    }

    /// Start the loop
    ///
    /// `interval_hours` overrides the configured interval for this run of
    /// the loop. Returns `Ok(false)` if the loop was already running.
    pub fn start(&self, interval_hours: Option<u64>) -> Result<bool, NurtureError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = worker.as_ref()
            && !current.handle.is_finished()
        {
            return Ok(false);
        }
        // Reap a worker that exited on its own
        if let Some(old) = worker.take() {
            let _ = old.handle.join();
        }

        if interval_hours == Some(0) {
            return Err(NurtureError::invalid_argument(
                "interval must be at least 1 hour",
            ));
        }

        let token = CancellationToken::new();
        let engine = Arc::clone(&self.engine);
        let status = Arc::clone(&self.status);
        let loop_token = token.clone();

        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.running = true;
            status.interval_hours = Some(interval_hours.unwrap_or_else(|| {
                engine
                    .config()
                    .snapshot()
                    .automation
                    .check_responses_interval_hours
            }));
        }

        let handle = std::thread::Builder::new()
            .name("nurture-loop".to_string())
            .spawn(move || run_loop(engine, status, loop_token, interval_hours))
            .map_err(|e| {
                self.status
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .running = false;
                NurtureError::Transient {
                    message: format!("Failed to spawn nurturing loop: {}", e),
                }
            })?;

        info!("Nurturing loop started");
        *worker = Some(Worker { token, handle });
        Ok(true)
    }

    /// Stop the loop and wait for it to exit
    ///
    /// A cycle already in progress finishes first.
    pub fn stop(&self) -> Result<(), NurtureError> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return Err(NurtureError::NotRunning);
        };

        worker.token.cancel();
        if worker.handle.join().is_err() {
            error!("Nurturing loop thread panicked");
        }

        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.running = false;
        status.next_run = None;
        info!("Nurturing loop stopped");
        Ok(())
    }

    /// Run one cycle on the calling thread
    ///
    /// Serialized with the loop by the engine's cycle lock.
    pub fn run_once(&self) -> Result<CycleOutcome, NurtureError> {
        run_and_record(&self.engine, &self.status)
    }

    pub fn is_running(&self) -> bool {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for NurtureRunner {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.token.cancel();
            let _ = worker.handle.join();
        }
    }
}

fn run_and_record(
    engine: &NurtureEngine,
    status: &Mutex<RunnerStatus>,
) -> Result<CycleOutcome, NurtureError> {
    let started = Utc::now();
    let result = engine.run_cycle_at(started);
    if let Err(e) = &result {
        warn!("Nurturing cycle failed: {}", e);
    }
    status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .record(started, &result);
    result
}

fn run_loop(
    engine: Arc<NurtureEngine>,
    status: Arc<Mutex<RunnerStatus>>,
    token: CancellationToken,
    interval_hours: Option<u64>,
) {
    while !token.is_cancelled() {
        let _ = run_and_record(&engine, &status);

        let consecutive = status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .consecutive_errors;
        let delay = if consecutive > 0 {
            backoff_delay(consecutive)
        } else {
            // Re-read so a config update changes the cadence
            let hours = interval_hours.unwrap_or_else(|| {
                engine
                    .config()
                    .snapshot()
                    .automation
                    .check_responses_interval_hours
            });
            Duration::from_secs(hours.saturating_mul(3600))
        };

        {
            let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
            status.next_run = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| Utc::now() + d);
        }
        info!("Next nurturing cycle in {} s", delay.as_secs());

        if token.wait_timeout(delay) {
            break;
        }
    }

    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.running = false;
    status.next_run = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHandle, NurtureConfig};
    use crate::contacts::StaticContacts;
    use crate::models::Contact;
    use crate::source::InMemoryMessageSource;
    use crate::storage::InMemoryLeadStore;
    use std::time::Instant;

    fn runner(store: Arc<InMemoryLeadStore>) -> NurtureRunner {
        let engine = NurtureEngine::new(
            Arc::new(InMemoryMessageSource::new()),
            store,
            Arc::new(StaticContacts(vec![Contact::new("a@x.com", "Ann", "X")])),
            Arc::new(ConfigHandle::new(NurtureConfig::default())),
        );
        NurtureRunner::new(Arc::new(engine))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(0), Duration::ZERO);
        assert_eq!(backoff_delay(1), Duration::from_secs(60));
        assert_eq!(backoff_delay(2), Duration::from_secs(120));
        assert_eq!(backoff_delay(5), Duration::from_secs(960));
        assert_eq!(backoff_delay(6), Duration::from_secs(1800));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(1800));
    }

    #[test]
    fn test_token_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(!CancellationToken::new().wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_start_runs_immediately_and_stops() {
        let store = Arc::new(InMemoryLeadStore::new());
        let runner = runner(store.clone());

        assert!(runner.start(Some(1)).unwrap());
        assert!(!runner.start(Some(1)).unwrap());
        wait_for(|| runner.status().total_runs >= 1);
        assert!(store.save_count() >= 1);

        runner.stop().unwrap();
        let status = runner.status();
        assert!(!status.running);
        assert_eq!(status.total_runs, 1);
        assert!(matches!(runner.stop(), Err(NurtureError::NotRunning)));
    }

    #[test]
    fn test_run_once_records_failure() {
        let store = Arc::new(InMemoryLeadStore::new());
        store.fail_saves(true);
        let runner = runner(store.clone());

        assert!(runner.run_once().is_err());
        let status = runner.status();
        assert_eq!(status.error_count, 1);
        assert_eq!(status.consecutive_errors, 1);
        assert!(status.last_error.unwrap().contains("simulated write failure"));

        store.fail_saves(false);
        runner.run_once().unwrap();
        let status = runner.status();
        assert_eq!(status.total_runs, 2);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_success.is_some());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let runner = runner(Arc::new(InMemoryLeadStore::new()));
        assert!(matches!(
            runner.start(Some(0)),
            Err(NurtureError::InvalidArgument { .. })
        ));
        assert!(!runner.is_running());
    }
}
