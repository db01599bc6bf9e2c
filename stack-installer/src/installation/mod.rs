// Installation logic
//
// This module contains the host provisioning steps (runtime, repository, environment
// file, stack) and the shared plumbing for running external commands with
// timeouts/retries.
//
// IMPORTANT:
// - Never log secrets (env values, generated passwords).
// - Every external command is bounded by a timeout, except attached streams the
//   operator interrupts (logs --follow).

pub mod backup;
pub mod environment;
pub mod files;
pub mod patch;
pub mod preflight;
pub mod privilege;
pub mod provisioner;
pub mod readiness;
pub mod repository;
pub mod resume;
pub mod runtime;
pub mod stack;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    /// Lossy UTF-8 view of stdout for parsing and messages.
    pub stdout: String,
    /// stdout exactly as the process wrote it.
    pub stdout_bytes: Vec<u8>,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr when present, else stdout; trimmed for messages.
    pub fn diagnostic(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_string()
        } else {
            err.to_string()
        }
    }
}

/// Failure to obtain an exit status at all (as opposed to a non-zero exit).
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("'{program}' was not found (operation={operation})")]
    NotFound { program: String, operation: String },
    #[error("'{program}' timed out after {timeout_ms}ms (operation={operation})")]
    TimedOut {
        program: String,
        operation: String,
        timeout_ms: u128,
    },
    #[error("'{program}' failed to run (operation={operation}): {source}")]
    Io {
        program: String,
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::NotFound { .. })
    }
}

/// A single external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the process cwd.
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
    /// Short label for logs (e.g. `docker_info`).
    pub operation: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: Duration::from_secs(120),
            operation: operation.into(),
        }
    }

    /// Build from an argv vector (`[program, args...]`).
    pub fn from_argv(argv: &[String], operation: impl Into<String>) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program.clone(), operation).args(rest.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = dur;
        self
    }

    fn masked_args(&self) -> String {
        self.args
            .iter()
            .map(|a| mask_arg_for_log(a))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Seam between the provisioning logic and the host's process table.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with captured output.
    ///
    /// Returns captured stdout/stderr even when exit code is non-zero (caller decides success).
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;

    /// Run with stdio attached to the operator's terminal (no capture, no timeout).
    async fn run_attached(&self, spec: &CommandSpec) -> Result<Option<i32>, CommandError>;
}

/// Runs real processes through tokio.
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        run_cmd_with_timeout(spec).await
    }

    async fn run_attached(&self, spec: &CommandSpec) -> Result<Option<i32>, CommandError> {
        info!(
            "[PHASE: command] [STEP: attached] running attached (operation={}, program={}, args=[{}])",
            spec.operation,
            spec.program,
            spec.masked_args()
        );
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        let status = cmd
            .status()
            .await
            .map_err(|e| classify_spawn_error(spec, e))?;
        Ok(status.code())
    }
}

fn mask_arg_for_log(arg: &str) -> String {
    // Heuristic masking: treat anything that looks like a secret as sensitive.
    let lower = arg.to_ascii_lowercase();
    if lower.contains("password") || lower.contains("secret") || lower.contains("token") {
        if arg.contains('=') {
            return crate::utils::logging::mask_assignment(arg);
        }
        return "***".to_string();
    }
    arg.to_string()
}

fn classify_spawn_error(spec: &CommandSpec, e: std::io::Error) -> CommandError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CommandError::NotFound {
            program: spec.program.clone(),
            operation: spec.operation.clone(),
        }
    } else {
        CommandError::Io {
            program: spec.program.clone(),
            operation: spec.operation.clone(),
            source: e,
        }
    }
}

fn is_transient_exec_error(e: &CommandError) -> bool {
    let CommandError::Io { source, .. } = e else {
        return false;
    };
    let msg = source.to_string().to_ascii_lowercase();
    msg.contains("temporarily")
        || msg.contains("temporary")
        || msg.contains("busy")
        || msg.contains("in use")
        || msg.contains("used by another process")
        || msg.contains("resource")
}

async fn run_cmd_with_timeout_once(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    let started = Instant::now();

    debug!(
        "[PHASE: command] [STEP: cmd] run_cmd_with_timeout_once entered (operation={}, program={}, args=[{}], cwd={:?}, timeout_ms={})",
        spec.operation,
        spec.program,
        spec.masked_args(),
        spec.cwd,
        spec.timeout.as_millis()
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| classify_spawn_error(spec, e))?;

    let io_err = |e: std::io::Error| CommandError::Io {
        program: spec.program.clone(),
        operation: spec.operation.clone(),
        source: e,
    };

    let mut stdout = child.stdout.take().ok_or_else(|| {
        io_err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "failed to capture stdout",
        ))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        io_err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "failed to capture stderr",
        ))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });

    let status = match timeout(spec.timeout, child.wait()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(io_err(e)),
        Err(_) => {
            warn!(
                "[PHASE: command] [STEP: cmd] Timeout reached (operation={}, program={}, timeout_ms={}); attempting to kill process",
                spec.operation,
                spec.program,
                spec.timeout.as_millis()
            );

            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: command] [STEP: cmd] Failed to kill timed-out process (operation={}, program={}): {}",
                    spec.operation, spec.program, e
                );
            }

            // Best-effort reap (avoid zombies)
            let _ = timeout(Duration::from_secs(5), child.wait()).await;

            return Err(CommandError::TimedOut {
                program: spec.program.clone(),
                operation: spec.operation.clone(),
                timeout_ms: spec.timeout.as_millis(),
            });
        }
    };

    let join_err =
        |e: tokio::task::JoinError| io_err(std::io::Error::new(std::io::ErrorKind::Other, e));
    let stdout_bytes = stdout_task.await.map_err(join_err)?.map_err(io_err)?;
    let stderr_str = stderr_task.await.map_err(join_err)?.map_err(io_err)?;

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stdout_bytes,
        stderr: stderr_str,
        duration_ms: started.elapsed().as_millis(),
    };

    debug!(
        "[PHASE: command] [STEP: cmd] run_cmd_with_timeout_once exit (operation={}, program={}, exit_code={:?}, duration_ms={}, stdout_len={}, stderr_len={})",
        spec.operation,
        spec.program,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );

    Ok(out)
}

/// Run an external command with a timeout and up to 3 retries for transient spawn failures.
///
/// Timeouts and non-zero exits are never retried.
pub async fn run_cmd_with_timeout(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    let started = Instant::now();
    debug!(
        "[PHASE: command] [STEP: cmd] run_cmd_with_timeout entered (operation={}, program={}, args_count={}, timeout_ms={})",
        spec.operation,
        spec.program,
        spec.args.len(),
        spec.timeout.as_millis()
    );

    let retry_strategy = ExponentialBackoff::from_millis(200)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    let result = RetryIf::spawn(
        retry_strategy,
        || run_cmd_with_timeout_once(spec),
        |e: &CommandError| {
            let transient = is_transient_exec_error(e);
            if transient {
                warn!(
                    "[PHASE: command] [STEP: cmd] Transient command failure detected; will retry (operation={}, program={}, err={})",
                    spec.operation, spec.program, e
                );
            }
            transient
        },
    )
    .await;

    match &result {
        Ok(out) => {
            debug!(
                "[PHASE: command] [STEP: cmd] run_cmd_with_timeout exit (operation={}, program={}, exit_code={:?}, duration_ms={})",
                spec.operation,
                spec.program,
                out.exit_code,
                started.elapsed().as_millis()
            );
        }
        Err(e) if e.is_not_found() => {
            debug!(
                "[PHASE: command] [STEP: cmd] program not found (operation={}, program={})",
                spec.operation, spec.program
            );
        }
        Err(e) => {
            error!(
                "[PHASE: command] [STEP: cmd] run_cmd_with_timeout error (operation={}, program={}, duration_ms={}, err={})",
                spec.operation,
                spec.program,
                started.elapsed().as_millis(),
                e
            );
        }
    }

    result
}
