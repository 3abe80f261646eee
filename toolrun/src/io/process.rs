//! Helpers for running child processes with timeouts and bounded output.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for output readers after a timed-out child was killed.
///
/// Grandchildren may keep the pipes open; their output is abandoned after this.
const READER_GRACE: Duration = Duration::from_millis(500);

const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was killed and could not be reaped.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }
}

/// Keeps the most recent bytes of a stream.
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    limit: usize,
    dropped: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        let excess = self.bytes.len().saturating_sub(self.limit);
        if excess > 0 {
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }

    fn snapshot(&self) -> (Vec<u8>, usize) {
        (self.bytes.iter().copied().collect(), self.dropped)
    }
}

type SharedTail = Arc<Mutex<TailBuffer>>;

/// Keep the last `limit` characters of `text`.
pub fn tail_chars(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    let skip = count - limit;
    match text.char_indices().nth(skip) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Run a command with a timeout, keeping the tail of stdout/stderr.
///
/// Output is read concurrently while the child runs, so pipes never fill up.
/// Each stream keeps at most `tail_chars` characters (the most recent ones).
/// On timeout the child is killed; output read before that is preserved.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), tail_chars))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    tail_chars: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    // A UTF-8 char is at most 4 bytes; trimming to chars happens after decoding.
    let byte_limit = tail_chars.saturating_mul(4).max(4);
    let stdout_tail = Arc::new(Mutex::new(TailBuffer::new(byte_limit)));
    let stderr_tail = Arc::new(Mutex::new(TailBuffer::new(byte_limit)));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    spawn_reader(stdout, stdout_tail.clone(), done_tx.clone());
    spawn_reader(stderr, stderr_tail.clone(), done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Some(status),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            if let Err(e) = child.kill() {
                warn!(err = %e, "kill after timeout failed");
            }
            child.wait().ok()
        }
    };

    let grace = if timed_out { Some(READER_GRACE) } else { None };
    let finished = wait_for_readers(&done_rx, 2, grace);
    if finished < 2 {
        warn!(finished, "abandoning output readers still holding pipes");
    }

    let (stdout, stdout_dropped) = decode_tail(&stdout_tail, tail_chars)?;
    let (stderr, stderr_dropped) = decode_tail(&stderr_tail, tail_chars)?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "output truncated to tail");
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, tail: SharedTail, done: mpsc::Sender<()>) {
    thread::spawn(move || {
        if let Err(e) = read_into_tail(reader, &tail) {
            warn!(err = %e, "output reader failed");
        }
        let _ = done.send(());
    });
}

fn read_into_tail<R: Read>(mut reader: R, tail: &SharedTail) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        tail.lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?
            .push(&chunk[..n]);
    }
}

/// Wait for up to `expected` reader completions; `grace` bounds the wait.
fn wait_for_readers(rx: &mpsc::Receiver<()>, expected: usize, grace: Option<Duration>) -> usize {
    let deadline = grace.map(|g| Instant::now() + g);
    let mut finished = 0;
    while finished < expected {
        let received = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(remaining).is_ok()
            }
            None => rx.recv().is_ok(),
        };
        if !received {
            break;
        }
        finished += 1;
    }
    finished
}

fn decode_tail(tail: &SharedTail, limit: usize) -> Result<(String, usize)> {
    let (bytes, dropped_bytes) = tail
        .lock()
        .map_err(|_| anyhow!("output buffer poisoned"))?
        .snapshot();
    let text = String::from_utf8_lossy(&bytes);
    let kept = tail_chars(&text, limit);
    let dropped = dropped_bytes + (text.len() - kept.len());
    Ok((kept.to_string(), dropped))
}

/// A launched process the caller does not own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedProcess {
    pub pid: u32,
    /// First line written to the log within the grace period, if any.
    pub boot_line: Option<String>,
}

/// Launch `cmd` without waiting for it, sending stdout and stderr to `log_path`.
///
/// Polls the log for a first line for at most `grace`. The child is neither
/// waited on nor killed; terminating it is the caller's responsibility.
#[instrument(skip_all, fields(log = %log_path.display(), grace_ms = grace.as_millis() as u64))]
pub fn spawn_detached(mut cmd: Command, log_path: &Path, grace: Duration) -> Result<DetachedProcess> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log = File::create(log_path)
        .with_context(|| format!("create log file {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("clone log handle {}", log_path.display()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning detached process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn detached command");
            return Err(e).context("spawn detached command");
        }
    };
    let pid = child.id();
    drop(child);

    let boot_line = read_first_line(log_path, grace);
    debug!(pid, has_boot_line = boot_line.is_some(), "detached process launched");
    Ok(DetachedProcess { pid, boot_line })
}

/// Best-effort read of the first complete line of `path` within `grace`.
fn read_first_line(path: &Path, grace: Duration) -> Option<String> {
    let deadline = Instant::now() + grace;
    loop {
        if let Ok(file) = File::open(path) {
            let mut line = String::new();
            if BufReader::new(file).read_line(&mut line).is_ok() && line.ends_with('\n') {
                return Some(line.trim_end().to_string());
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(BOOT_POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn tail_chars_keeps_last_characters() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("ääää", 2), "ää");
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let out = run_command_with_timeout(
            sh("echo out; echo err 1>&2; exit 3"),
            Duration::from_secs(10),
            1_000,
        )
        .expect("run");
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.exit_code(), Some(3));
        assert!(!out.timed_out);
    }

    #[test]
    fn output_is_truncated_to_tail() {
        let out = run_command_with_timeout(
            sh("printf 'aaaaaaaaaabbbbb'"),
            Duration::from_secs(10),
            5,
        )
        .expect("run");
        assert_eq!(out.stdout, "bbbbb");
        assert_eq!(out.stdout_dropped, 10);
    }

    #[test]
    fn timeout_kills_and_keeps_partial_output() {
        let started = Instant::now();
        let out = run_command_with_timeout(
            sh("echo early; sleep 5; echo late"),
            Duration::from_millis(300),
            1_000,
        )
        .expect("run");
        assert!(out.timed_out);
        assert_eq!(out.stdout, "early\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/definitely/not/a/binary"),
            Duration::from_secs(1),
            10,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn detached_process_reports_pid_and_boot_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("serve.log");
        let proc = spawn_detached(
            sh("echo listening; sleep 5"),
            &log,
            Duration::from_secs(3),
        )
        .expect("spawn");
        assert_eq!(proc.boot_line.as_deref(), Some("listening"));
        assert!(proc.pid > 0);
        let _ = Command::new("kill").arg(proc.pid.to_string()).status();
    }

    #[test]
    fn silent_detached_process_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("quiet.log");
        let proc = spawn_detached(sh("sleep 5"), &log, Duration::from_millis(100)).expect("spawn");
        assert_eq!(proc.boot_line, None);
        let _ = Command::new("kill").arg(proc.pid.to_string()).status();
    }
}
