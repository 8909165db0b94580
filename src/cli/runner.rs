//! Sandboxed CLI process execution.
//!
//! Children are spawned from an argv vector (never through a shell) with an
//! explicitly built environment, a hard wall-clock deadline, and size-bounded
//! capture of stdout and stderr. The exit code is returned as-is; deciding
//! what it means is left to [`super::classify`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Shortest deadline a request may carry.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest deadline a request may carry (10 minutes).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Prompts larger than this many bytes are sent over stdin instead of argv.
pub const STDIN_THRESHOLD: usize = 8 * 1024;

/// Time allowed for killing and reaping a child after its deadline, and for
/// draining output still held open by its subprocesses after it exits.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Locale used when the caller has none set.
pub const DEFAULT_LOCALE: &str = "C.UTF-8";

const BASE_VARS: &[&str] = &["PATH", "HOME", "USER"];

const LOCALE_VARS: &[&str] = &["LANG", "LC_ALL", "LC_CTYPE"];

/// Variables that are never forwarded, even if a tool lists them as credentials.
pub const NEVER_PASSED: &[&str] = &[
    "SHELL",
    "PS1",
    "PS2",
    "PS4",
    "BASH_ENV",
    "ENV",
    "IFS",
    "CDPATH",
    "PROMPT_COMMAND",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "NODE_OPTIONS",
];

const READ_CHUNK: usize = 8192;

/// Capture limits for a single process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    /// Maximum stdout bytes retained. Default: 2 MB.
    pub max_stdout: usize,
    /// Maximum stderr bytes retained. Default: 1 MB.
    pub max_stderr: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_stdout: 2 * 1024 * 1024,
            max_stderr: 1024 * 1024,
        }
    }
}

/// A fully specified child process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdin: Option<String>,
    timeout: Duration,
    limits: OutputLimits,
}

impl ProcessRequest {
    /// Create a request. The deadline is clamped to `[MIN_TIMEOUT, MAX_TIMEOUT]`.
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            env,
            stdin: None,
            timeout: clamp_timeout(timeout),
            limits: OutputLimits::default(),
        }
    }

    /// Payload written to the child's stdin, which is then closed.
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Override the default capture caps.
    pub fn with_limits(mut self, limits: OutputLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Executable to spawn.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program, in order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Complete child environment; nothing else is inherited.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Stdin payload, if the prompt goes over stdin.
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Clamped wall-clock deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Capture caps for stdout and stderr.
    pub fn limits(&self) -> OutputLimits {
        self.limits
    }
}

/// Raw result of a finished process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Clamp a deadline into the allowed range.
pub fn clamp_timeout(requested: Duration) -> Duration {
    requested.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Snapshot the current process environment.
pub fn snapshot_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Build the child environment from an allow-list.
///
/// Only `PATH`, `HOME`, `USER`, locale variables and the tool's
/// `credential_vars` are copied from `source`. `overrides` may only target
/// credential variables; anything else is dropped. `LANG` and `LC_ALL`
/// default to [`DEFAULT_LOCALE`] and `NO_COLOR=1` is always set.
pub fn build_environment(
    source: &HashMap<String, String>,
    credential_vars: &[&str],
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let allowed = |key: &str| !NEVER_PASSED.contains(&key);

    let mut env = BTreeMap::new();

    for key in BASE_VARS.iter().chain(credential_vars).filter(|k| allowed(k)) {
        if let Some(value) = source.get(*key) {
            env.insert((*key).to_string(), value.clone());
        }
    }

    for key in LOCALE_VARS {
        if let Some(value) = source.get(*key).filter(|v| !v.is_empty()) {
            env.insert((*key).to_string(), value.clone());
        }
    }
    env.entry("LANG".to_string())
        .or_insert_with(|| DEFAULT_LOCALE.to_string());
    env.entry("LC_ALL".to_string())
        .or_insert_with(|| DEFAULT_LOCALE.to_string());

    env.insert("NO_COLOR".to_string(), "1".to_string());

    for (key, value) in overrides {
        if credential_vars.contains(&key.as_str()) && allowed(key) {
            env.insert(key.clone(), value.clone());
        } else {
            warn!("Dropping environment override for non-allow-listed variable {}", key);
        }
    }

    env
}

/// Suffix appended once to a stream that hit its size cap.
pub fn truncation_marker(stream: &str) -> String {
    format!("\n... ({stream} truncated due to size limit)")
}

/// Largest char boundary of `s` that is `<= index`.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Trait for executing a prepared process request.
///
/// This abstraction allows mocking the subprocess in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run the request to completion, deadline, or launch failure.
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutcome, ProviderError>;
}

/// Production executor backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct SecureRunner {
    tool: String,
}

impl SecureRunner {
    /// `tool` names the CLI in error messages.
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    fn launch_failed(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::LaunchFailed {
            tool: self.tool.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ProcessExecutor for SecureRunner {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutcome, ProviderError> {
        let start = Instant::now();
        let limits = request.limits;
        let deadline = request.timeout;

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .env_clear()
            .envs(&request.env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so teardown reaches the tool's subprocesses too.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "Spawning {} with {} args, {} env vars, prompt via {}",
            request.program.display(),
            request.args.len(),
            request.env.len(),
            if request.stdin.is_some() { "stdin" } else { "argv" }
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| self.launch_failed(format!("spawn failed: {e}")))?;
        let group = ProcessGroup::of(&child);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.launch_failed("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.launch_failed("stderr was not captured"))?;

        let mut stdin_writer = match (child.stdin.take(), request.stdin) {
            (Some(mut pipe), Some(payload)) => Some(tokio::spawn(async move {
                pipe.write_all(payload.as_bytes()).await?;
                pipe.shutdown().await
            })),
            _ => None,
        };

        let mut stdout_reader = tokio::spawn(read_bounded(stdout, limits.max_stdout));
        let mut stderr_reader = tokio::spawn(read_bounded(stderr, limits.max_stderr));

        let status = match timeout(deadline, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                if let Some(writer) = stdin_writer {
                    writer.abort();
                }
                terminate(&mut child, group).await;
                stdout_reader.abort();
                stderr_reader.abort();
                warn!(
                    "{} exceeded its {}s deadline and was terminated",
                    self.tool,
                    deadline.as_secs()
                );
                return Err(ProviderError::Timeout {
                    tool: self.tool.clone(),
                    limit: Some(deadline),
                    detail: format!(
                        "no response within {}s; the process was terminated",
                        deadline.as_secs()
                    ),
                });
            }
        };
        let status =
            status.map_err(|e| self.launch_failed(format!("failed to wait for process: {e}")))?;

        // The tool has exited. Subprocesses it left behind may still hold the
        // pipes open; give them the grace period, then kill the group.
        let drained = timeout(TEARDOWN_GRACE, async {
            tokio::join!(&mut stdout_reader, &mut stderr_reader)
        })
        .await;
        let (out, err) = match drained {
            Ok(pair) => pair,
            Err(_) => {
                warn!(
                    "{} exited but its subprocesses kept the output open; terminating them",
                    self.tool
                );
                group.kill();
                match timeout(TEARDOWN_GRACE, async {
                    tokio::join!(&mut stdout_reader, &mut stderr_reader)
                })
                .await
                {
                    Ok(pair) => pair,
                    Err(_) => {
                        stdout_reader.abort();
                        stderr_reader.abort();
                        return Err(self.launch_failed("output pipes stayed open after exit"));
                    }
                }
            }
        };

        if let Some(writer) = stdin_writer.as_mut() {
            match timeout(TEARDOWN_GRACE, &mut *writer).await {
                Ok(Ok(Ok(()))) => {}
                // The child may exit without draining stdin; that is not a failure.
                Ok(Ok(Err(e))) => debug!("stdin write ended early: {}", e),
                Ok(Err(e)) => debug!("stdin writer task failed: {}", e),
                Err(_) => {
                    debug!("stdin writer still blocked after exit");
                    writer.abort();
                }
            }
        }

        let out = out
            .map_err(|e| self.launch_failed(format!("stdout reader failed: {e}")))?
            .map_err(|e| self.launch_failed(format!("failed to read stdout: {e}")))?;
        let err = err
            .map_err(|e| self.launch_failed(format!("stderr reader failed: {e}")))?
            .map_err(|e| self.launch_failed(format!("failed to read stderr: {e}")))?;

        let (stdout, stdout_truncated) = out.into_text("stdout", limits.max_stdout);
        let (stderr, stderr_truncated) = err.into_text("stderr", limits.max_stderr);

        let outcome = ProcessOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration: start.elapsed(),
            stdout_truncated,
            stderr_truncated,
        };

        debug!(
            "{} exited with code {} in {:?} (stdout {} bytes, stderr {} bytes)",
            self.tool,
            outcome.exit_code,
            outcome.duration,
            outcome.stdout.len(),
            outcome.stderr.len()
        );

        Ok(outcome)
    }
}

/// Process group of a spawned child; the child is its leader.
#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Option<i32>);

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self(child.id().and_then(|pid| i32::try_from(pid).ok()))
    }

    /// SIGKILL every process in the group.
    #[cfg(unix)]
    fn kill(self) {
        if let Some(pgid) = self.0 {
            // SAFETY: killpg only sends a signal; a stale group yields ESRCH.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                debug!(
                    "killpg({}) failed: {}",
                    pgid,
                    std::io::Error::last_os_error()
                );
            }
        }
    }

    #[cfg(not(unix))]
    fn kill(self) {}
}

/// Kill a child and its process group, then reap it within [`TEARDOWN_GRACE`].
async fn terminate(child: &mut Child, group: ProcessGroup) {
    group.kill();
    if let Err(e) = child.start_kill() {
        debug!("Direct kill of timed-out process failed: {}", e);
    }
    match timeout(TEARDOWN_GRACE, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to reap timed-out process: {}", e),
        Err(_) => warn!(
            "Timed-out process did not exit within {:?} of being killed",
            TEARDOWN_GRACE
        ),
    }
}

/// Bytes read from one stream, capped at a limit.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    /// Decode lossily, enforce the byte cap on a char boundary and append the
    /// marker once if anything was dropped.
    fn into_text(self, stream: &str, limit: usize) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        let mut truncated = self.truncated;

        if text.len() > limit {
            text.truncate(floor_char_boundary(&text, limit));
            truncated = true;
        }

        if truncated {
            warn!("{} truncated to {} bytes", stream, text.len());
            text.push_str(&truncation_marker(stream));
        }

        (text, truncated)
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
///
/// Bytes past the limit are still drained so the child never blocks on a
/// full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<Captured> {
    let mut captured = Captured::default();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&buf[..n.min(room)]);
    }

    Ok(captured)
}
