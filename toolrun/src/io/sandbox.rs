//! Sandbox executor for model-authored code.
//!
//! Three modes, each with its own lifecycle:
//!
//! - `inline`: evaluated in-process by an [`InlineEvaluator`]; no timeout, always `ok`.
//! - `script`: written to the sandbox and run as a fresh process under a timeout.
//! - `serve`: written to the sandbox and launched detached; the executor returns
//!   the pid and URL and keeps no handle to the process.
//!
//! The sandbox directory and the target file names in it are shared by every
//! job of the process. There is no locking: callers running jobs concurrently
//! must give them distinct file names. A `serve` job also writes its process
//! output to `<filename>.log` next to the target, so no other job may use that
//! name.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::inline::{Capture, InlineEvaluator, LineEvaluator};
use crate::core::types::{ExecFailure, ExecutionResult, InlineOutcome, Mode};
use crate::io::config::RuntimeConfig;
use crate::io::process::{run_command_with_timeout, spawn_detached, tail_chars};

/// One execution request after mode parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxJob {
    pub source: String,
    pub mode: Mode,
    /// Target file name inside the sandbox; the configured default when `None`.
    pub filename: Option<String>,
    /// `script` only; the configured default when `None`.
    pub timeout: Option<Duration>,
    /// `serve` only; the configured default when `None`.
    pub port: Option<u16>,
}

impl SandboxJob {
    pub fn new(source: impl Into<String>, mode: Mode) -> Self {
        Self {
            source: source.into(),
            mode,
            filename: None,
            timeout: None,
            port: None,
        }
    }
}

/// Execution request as it arrives from the agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub code: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub filename: Option<String>,
    /// Seconds; non-positive values fall back to the default.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_mode() -> String {
    Mode::Inline.as_str().to_string()
}

impl ExecRequest {
    pub fn inline(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            mode: default_mode(),
            filename: None,
            timeout: None,
            port: None,
        }
    }

    /// Parse the mode; an unknown mode yields the failure result to return.
    pub fn into_job(self) -> Result<SandboxJob, ExecutionResult> {
        let mode = self.mode.parse::<Mode>().map_err(|err| {
            ExecutionResult::failed(ExecFailure::UnsupportedMode, err.to_string())
        })?;
        let timeout = self
            .timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero());
        Ok(SandboxJob {
            source: self.code,
            mode,
            filename: self.filename,
            timeout,
            port: self.port,
        })
    }
}

pub struct SandboxExecutor {
    sandbox_dir: PathBuf,
    config: RuntimeConfig,
    evaluator: Box<dyn InlineEvaluator>,
}

impl SandboxExecutor {
    /// Executor whose sandbox is `config.sandbox_dir` resolved against `root`.
    ///
    /// A relative `root` is made absolute first: the child runs inside the
    /// sandbox and receives the target path as an argument.
    pub fn new(root: &Path, config: &RuntimeConfig) -> Self {
        let root = absolute_root(root);
        Self {
            sandbox_dir: config.sandbox_path(&root),
            config: config.clone(),
            evaluator: Box::new(LineEvaluator),
        }
    }

    pub fn with_evaluator<E: InlineEvaluator + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }

    /// Run a wire-level request. Never fails; failures are in the result.
    pub fn execute(&self, request: ExecRequest) -> ExecutionResult {
        match request.into_job() {
            Ok(job) => self.run(&job),
            Err(unsupported) => {
                warn!(stderr = %unsupported.stderr, "rejected execution request");
                unsupported
            }
        }
    }

    pub fn run(&self, job: &SandboxJob) -> ExecutionResult {
        debug!(mode = %job.mode, bytes = job.source.len(), "running sandbox job");
        match job.mode {
            Mode::Inline => self.run_inline(job),
            Mode::Script => self.run_script(job),
            Mode::Serve => self.run_serve(job),
        }
    }

    fn run_inline(&self, job: &SandboxJob) -> ExecutionResult {
        let mut capture = Capture::default();
        let outcome = self.evaluator.evaluate(&job.source, &mut capture);
        match &outcome {
            InlineOutcome::NormalCompletion => debug!("inline job completed"),
            InlineOutcome::StopSignal => debug!("inline job stopped"),
            InlineOutcome::Fault(message) => debug!(%message, "inline job faulted"),
        }
        let limit = self.config.output_tail_chars;
        ExecutionResult::ok(
            tail_chars(&capture.stdout, limit),
            tail_chars(&capture.stderr, limit),
        )
    }

    #[instrument(skip_all, fields(filename = tracing::field::Empty))]
    fn run_script(&self, job: &SandboxJob) -> ExecutionResult {
        let target = match self.write_target(job) {
            Ok(path) => path,
            Err(err) => return launch_failure(&err, None),
        };
        let timeout = job.timeout.unwrap_or_else(|| self.config.script_timeout());
        let cmd = match self.command(&self.config.script_command, &target, None) {
            Ok(cmd) => cmd,
            Err(err) => return launch_failure(&err, Some(&target)),
        };

        let output =
            match run_command_with_timeout(cmd, timeout, self.config.output_tail_chars) {
                Ok(output) => output,
                Err(err) => return launch_failure(&err, Some(&target)),
            };

        let path = Some(target.display().to_string());
        if output.timed_out {
            warn!(timeout_ms = timeout.as_millis() as u64, "script timed out");
            let mut stderr = output.stderr;
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("[timed out after {:.1}s]\n", timeout.as_secs_f64()));
            return ExecutionResult {
                stdout: output.stdout,
                stderr,
                path,
                ..ExecutionResult::failed(ExecFailure::Timeout, String::new())
            };
        }

        info!(exit_code = ?output.exit_code(), "script finished");
        ExecutionResult {
            path,
            exit_code: output.exit_code(),
            ..ExecutionResult::ok(output.stdout, output.stderr)
        }
    }

    #[instrument(skip_all, fields(filename = tracing::field::Empty, port = tracing::field::Empty))]
    fn run_serve(&self, job: &SandboxJob) -> ExecutionResult {
        let target = match self.write_target(job) {
            Ok(path) => path,
            Err(err) => return launch_failure(&err, None),
        };
        let port = job.port.unwrap_or(self.config.default_port);
        tracing::Span::current().record("port", port);
        let cmd = match self.command(&self.config.serve_command, &target, Some(port)) {
            Ok(cmd) => cmd,
            Err(err) => return launch_failure(&err, Some(&target)),
        };
        let log_path = log_path_for(&target);
        let launched = match spawn_detached(cmd, &log_path, self.config.boot_grace()) {
            Ok(launched) => launched,
            Err(err) => return launch_failure(&err, Some(&target)),
        };

        info!(pid = launched.pid, port, "service launched");
        ExecutionResult {
            path: Some(target.display().to_string()),
            url: Some(format!("http://localhost:{port}")),
            pid: Some(launched.pid),
            ..ExecutionResult::ok(launched.boot_line.unwrap_or_default(), String::new())
        }
    }

    /// Write the job source to its target file, replacing earlier content.
    fn write_target(&self, job: &SandboxJob) -> Result<PathBuf> {
        let filename = job
            .filename
            .as_deref()
            .unwrap_or(&self.config.default_filename);
        validate_filename(filename)?;
        tracing::Span::current().record("filename", filename);
        fs::create_dir_all(&self.sandbox_dir)
            .with_context(|| format!("create sandbox dir {}", self.sandbox_dir.display()))?;
        let target = self.sandbox_dir.join(filename);
        fs::write(&target, &job.source)
            .with_context(|| format!("write {}", target.display()))?;
        Ok(target)
    }

    /// Build an isolated command: cleared environment plus the passthrough list,
    /// working directory pinned to the sandbox.
    fn command(&self, template: &[String], file: &Path, port: Option<u16>) -> Result<Command> {
        let args = render_command(template, file, port);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("empty command template"))?;
        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.sandbox_dir).env_clear();
        for key in &self.config.env_passthrough {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
        Ok(cmd)
    }
}

fn absolute_root(root: &Path) -> PathBuf {
    root.canonicalize()
        .or_else(|_| std::path::absolute(root))
        .unwrap_or_else(|err| {
            warn!(root = %root.display(), %err, "cannot make root absolute");
            root.to_path_buf()
        })
}

/// Substitute `{file}` and `{port}` in each template argument.
pub fn render_command(template: &[String], file: &Path, port: Option<u16>) -> Vec<String> {
    let file = file.display().to_string();
    let port = port.map(|p| p.to_string()).unwrap_or_default();
    template
        .iter()
        .map(|arg| arg.replace("{file}", &file).replace("{port}", &port))
        .collect()
}

fn validate_filename(name: &str) -> Result<()> {
    let plain = Path::new(name)
        .file_name()
        .is_some_and(|file_name| file_name == name);
    if name.trim().is_empty() || !plain || name.contains(['/', '\\']) {
        return Err(anyhow!("invalid sandbox filename {name:?}"));
    }
    Ok(())
}

fn log_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".log");
    target.with_file_name(name)
}

fn launch_failure(err: &anyhow::Error, target: Option<&Path>) -> ExecutionResult {
    warn!(err = %format!("{err:#}"), "launch failed");
    ExecutionResult {
        path: target.map(|p| p.display().to_string()),
        ..ExecutionResult::failed(ExecFailure::LaunchFailure, format!("runner error: {err:#}"))
    }
}
