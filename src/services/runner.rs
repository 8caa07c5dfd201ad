//! Child process execution shared by the capture and reachability services.
//!
//! Tools are spawned directly (never through a shell), with stdout and stderr
//! piped and stdin closed. A wall-clock bound terminates the whole process
//! group and reaps the child before returning.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::{DiagError, DiagResult};

/// Time a tool gets to exit after SIGTERM before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// A fully-tokenized command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: String,
    args: Vec<String>,
    /// Name used in error messages (the tool, not its wrapper).
    label: String,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            args: Vec::new(),
        }
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

    /// Run this invocation through `wrapper` (e.g. `sudo -n`).
    ///
    /// An empty wrapper leaves the invocation unchanged.
    pub fn wrapped(self, wrapper: &[String]) -> Self {
        let Some((program, wrapper_args)) = wrapper.split_first() else {
            return self;
        };

        let mut args = wrapper_args.to_vec();
        args.push(self.program);
        args.extend(self.args);

        Self {
            program: program.clone(),
            args,
            label: self.label,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Limits applied to a single tool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionBound {
    pub timeout: Option<Duration>,
}

impl ExecutionBound {
    pub fn unbounded() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Collected output of a finished tool.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Non-blank stdout lines in emission order.
    pub lines: Vec<String>,
    pub stderr: String,
}

/// Spawn `invocation`, wait for it to exit (or for the bound to elapse) and
/// collect its output.
///
/// On timeout the child's process group is terminated and the child reaped
/// before `DiagError::Timeout` is returned. Dropping the returned future kills
/// the child as well.
pub async fn run_tool(invocation: &ToolInvocation, bound: ExecutionBound) -> DiagResult<ToolOutput> {
    tracing::debug!("Launching {} {:?}", invocation.program, invocation.args);

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| spawn_failure(invocation, e))?;
    let pid = child.id();
    let mut guard = GroupGuard { pid };

    let collected = match bound.timeout {
        Some(limit) => {
            let bounded = tokio::time::timeout(limit, collect(&mut child)).await;
            match bounded {
                Ok(collected) => collected,
                Err(_) => {
                    tracing::warn!("{} exceeded {:?}, terminating", invocation.label, limit);
                    terminate(&mut child, pid).await;
                    guard.disarm();
                    return Err(DiagError::Timeout {
                        target: invocation.label.clone(),
                    });
                }
            }
        }
        None => collect(&mut child).await,
    };

    guard.disarm();
    let (status, stdout, stderr) = collected.map_err(|e| collect_failure(invocation, e))?;
    let lines = output_lines(&stdout);
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    if !status.success() && lines.is_empty() {
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| status.to_string());
        tracing::warn!("{} failed ({}): {}", invocation.label, status, reason);
        return Err(DiagError::ToolFailure {
            tool: invocation.label.clone(),
            reason,
        });
    }

    if !stderr.trim().is_empty() {
        tracing::debug!("{} stderr: {}", invocation.label, stderr.trim());
    }

    Ok(ToolOutput {
        status,
        lines,
        stderr,
    })
}

/// Stops the child's process group if `run_tool` is dropped mid-flight.
///
/// The group gets SIGTERM right away (a privilege wrapper relays it to the
/// tool, which SIGKILL would not) and SIGKILL after the grace period if the
/// group is still alive. The
/// dropped `Child` is reaped by tokio in the background.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid.take() {
            tracing::debug!("Tool run cancelled, stopping process group {}", pid);
            signal_group(pid, libc::SIGTERM);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    tokio::time::sleep(TERMINATE_GRACE).await;
                    if group_alive(pid) {
                        signal_group(pid, libc::SIGKILL);
                    }
                });
            }
        }
    }
}

/// Split decoded tool output into non-blank lines, keeping order.
pub fn output_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn spawn_failure(invocation: &ToolInvocation, err: std::io::Error) -> DiagError {
    let reason = match err.kind() {
        ErrorKind::NotFound => format!("{} not found", invocation.program),
        ErrorKind::PermissionDenied => format!("permission denied executing {}", invocation.program),
        _ => format!("failed to start {}: {}", invocation.program, err),
    };
    tracing::warn!("{}", reason);
    DiagError::ToolFailure {
        tool: invocation.label.clone(),
        reason,
    }
}

fn collect_failure(invocation: &ToolInvocation, err: std::io::Error) -> DiagError {
    tracing::warn!("Failed to collect {} output: {}", invocation.label, err);
    DiagError::ToolFailure {
        tool: invocation.label.clone(),
        reason: format!("failed to collect output: {}", err),
    }
}

async fn collect(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, stdout, stderr) = tokio::join!(child.wait(), read_all(stdout), read_all(stderr));
    Ok((status?, stdout?, stderr?))
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Stop the child and its process group, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if stop_group(child, pid).await {
        return;
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill child process: {}", e);
    }
}

/// SIGTERM the process group (a wrapper like sudo relays it to the tool) and
/// wait out the grace period. Leftover group members get SIGKILL either way.
///
/// Returns true once the child has been reaped.
#[cfg(unix)]
async fn stop_group(child: &mut Child, pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    signal_group(pid, libc::SIGTERM);
    let exited = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok();
    signal_group(pid, libc::SIGKILL);
    exited
}

#[cfg(not(unix))]
async fn stop_group(_child: &mut Child, _pid: Option<u32>) -> bool {
    false
}

/// Whether any process is still in group `pgid`.
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    // Signal 0 checks for existence without delivering anything.
    unsafe { libc::kill(-(pgid as libc::pid_t), 0) == 0 }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    // The child was spawned as leader of its own group, so pgid == pid.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signal) };
    if rc != 0 {
        tracing::debug!(
            "Signal {} to process group {}: {}",
            signal,
            pgid,
            std::io::Error::last_os_error()
        );
    }
}
