//! Shared deterministic types for the runtime core.
//!
//! These types are the stable contracts between the bundler, the sandbox
//! executor and the tool surface. They carry no I/O and serialize to the JSON
//! shapes the agent runtime consumes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One loaded component in a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path exactly as requested.
    pub id: String,
    /// Short content digest (traceability, not security).
    pub digest: String,
    /// Byte length of the raw text.
    pub size: usize,
}

/// Concatenated component text plus its provenance.
///
/// Manifest order always equals request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub text: String,
    pub manifest: Vec<ManifestEntry>,
}

/// Execution mode for a sandbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// In-process evaluation, no subprocess.
    Inline,
    /// Subprocess run to completion under a timeout.
    Script,
    /// Detached long-running subprocess bound to a port.
    Serve,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Inline => "inline",
            Mode::Script => "script",
            Mode::Serve => "serve",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode string is not one of `inline`, `script`, `serve`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported mode: {0}")]
pub struct UnsupportedMode(pub String);

impl FromStr for Mode {
    type Err = UnsupportedMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "inline" => Ok(Mode::Inline),
            "script" => Ok(Mode::Script),
            // The original tool called this mode after the dashboard server it launched.
            "serve" | "streamlit" => Ok(Mode::Serve),
            other => Err(UnsupportedMode(other.to_string())),
        }
    }
}

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
}

/// Why a job ended in `status=error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailure {
    Timeout,
    LaunchFailure,
    UnsupportedMode,
}

/// Result of one sandbox job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Successful result with captured streams.
    pub fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Ok,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: None,
            path: None,
            url: None,
            pid: None,
            exit_code: None,
            timed_out: false,
        }
    }

    /// Failed result; `message` becomes the stderr text.
    pub fn failed(kind: ExecFailure, message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Error,
            error: Some(kind),
            timed_out: kind == ExecFailure::Timeout,
            ..Self::ok(String::new(), message)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecStatus::Ok
    }
}

/// How an inline evaluation ended. All variants map to `status=ok` externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineOutcome {
    /// Ran off the end of the source.
    NormalCompletion,
    /// The code asked to stop (`exit()`, `raise SystemExit`).
    StopSignal,
    /// Evaluation failed; the message was rendered into stderr.
    Fault(String),
}
