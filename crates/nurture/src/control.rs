//! Remote-control operations
//!
//! Every operation returns human-readable text and never fails outward:
//! errors become an `Error: ...` line. [`ControlRequest`] and
//! [`ControlResponse`] are the JSON shapes used by the line-oriented
//! transport in the daemon.

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::NurtureError;
use crate::logging::recent_logs;
use crate::runner::NurtureRunner;

/// Lines returned by `get_logs` when no count is given
pub const DEFAULT_LOG_LINES: usize = 50;

/// Subject of the status summary sent by `send_test`
const TEST_SUBJECT: &str = "Lead nurturing status";

/// One request on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Start {
        #[serde(default)]
        interval_hours: Option<u64>,
    },
    Stop,
    RunOnce,
    #[serde(alias = "status")]
    GetStatus,
    #[serde(alias = "report")]
    GetReport,
    UpdateConfig {
        config: serde_json::Value,
    },
    SendTest {
        email: String,
    },
    #[serde(alias = "logs")]
    GetLogs {
        #[serde(default)]
        n: Option<usize>,
    },
}

/// One response on the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub text: String,
}

impl ControlResponse {
    fn from_result(result: Result<String, NurtureError>) -> Self {
        match result {
            Ok(text) => Self { ok: true, text },
            Err(e) => Self {
                ok: false,
                text: format!("Error: {}", e),
            },
        }
    }

    /// Response for a line that could not be parsed as a request
    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            text: format!("Error: malformed request: {}", err),
        }
    }
}

/// Text front end over a [`NurtureRunner`]
pub struct ControlSurface {
    runner: Arc<NurtureRunner>,
}

impl ControlSurface {
    pub fn new(runner: Arc<NurtureRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<NurtureRunner> {
        &self.runner
    }

    /// Dispatch a parsed request
    pub fn handle(&self, request: ControlRequest) -> ControlResponse {
        info!("Control request: {:?}", request);
        ControlResponse::from_result(match request {
            ControlRequest::Start { interval_hours } => self.try_start(interval_hours),
            ControlRequest::Stop => self.try_stop(),
            ControlRequest::RunOnce => self.try_run_once(),
            ControlRequest::GetStatus => Ok(self.get_status()),
            ControlRequest::GetReport => self.try_report(),
            ControlRequest::UpdateConfig { config } => self.try_update_config(&config),
            ControlRequest::SendTest { email } => self.try_send_test(&email),
            ControlRequest::GetLogs { n } => Ok(self.get_logs(n.unwrap_or(DEFAULT_LOG_LINES))),
        })
    }

    /// Parse and dispatch one JSON request line
    pub fn handle_line(&self, line: &str) -> ControlResponse {
        match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => self.handle(request),
            Err(e) => ControlResponse::malformed(e),
        }
    }

    pub fn start(&self, interval_hours: Option<u64>) -> String {
        text(self.try_start(interval_hours))
    }

    pub fn stop(&self) -> String {
        text(self.try_stop())
    }

    pub fn run_once(&self) -> String {
        text(self.try_run_once())
    }

    pub fn get_status(&self) -> String {
        self.runner.status().to_string()
    }

    pub fn get_report(&self) -> String {
        text(self.try_report())
    }

    pub fn update_config(&self, partial: &serde_json::Value) -> String {
        text(self.try_update_config(partial))
    }

    pub fn send_test(&self, email: &str) -> String {
        text(self.try_send_test(email))
    }

    /// The last `n` captured log lines
    pub fn get_logs(&self, n: usize) -> String {
        let lines = recent_logs(n);
        if lines.is_empty() {
            return "No log lines captured".to_string();
        }
        lines.join("\n")
    }

    fn try_start(&self, interval_hours: Option<u64>) -> Result<String, NurtureError> {
        if self.runner.start(interval_hours)? {
            let hours = self.runner.status().interval_hours.unwrap_or_default();
            Ok(format!(
                "Nurturing loop started, running every {} hour(s)",
                hours
            ))
        } else {
            Ok("Nurturing loop is already running".to_string())
        }
    }

    fn try_stop(&self) -> Result<String, NurtureError> {
        self.runner.stop()?;
        Ok("Nurturing loop stopped".to_string())
    }

    fn try_run_once(&self) -> Result<String, NurtureError> {
        Ok(self.runner.run_once()?.to_string())
    }

    fn try_report(&self) -> Result<String, NurtureError> {
        Ok(self.runner.engine().report()?.to_string())
    }

    fn try_update_config(&self, partial: &serde_json::Value) -> Result<String, NurtureError> {
        let config = self
            .runner
            .engine()
            .config()
            .update(partial)
            .map_err(NurtureError::config)?;
        let text = serde_json::to_string_pretty(&*config).map_err(NurtureError::config)?;
        Ok(format!("Configuration updated:\n{}", text))
    }

    fn try_send_test(&self, email: &str) -> Result<String, NurtureError> {
        let engine = self.runner.engine();
        let report = engine.report()?;
        let body = format!(
            "Lead nurturing status as of {}\n\n{}\n{}",
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
            self.runner.status(),
            report
        );
        let id = engine.send_test(email, TEST_SUBJECT, &body)?;
        Ok(format!("Test message sent to {} (id {})", email.trim(), id))
    }
}

fn text(result: Result<String, NurtureError>) -> String {
    ControlResponse::from_result(result).text
}
