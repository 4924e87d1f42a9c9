//! External command execution
//!
//! Every system mutation made by the crate goes through [`CommandExecutor`].
//! [`SystemExecutor`] runs real processes on tokio; [`RecordingExecutor`]
//! records invocations and answers from a script, which backs `--dry-run`
//! and the test suites.

use crate::error::{PortalError, PortalResult};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default bound for a single external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A program and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
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

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Handle to a long-lived supervised process (dnsmasq, hostapd)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChildProcess: Send + Sync {
    /// OS process id, if still known
    fn id(&self) -> Option<u32>;

    /// Exit code if the process already finished, without blocking
    fn try_exit(&mut self) -> PortalResult<Option<i32>>;

    /// Request termination, wait up to `grace`, then force-kill and reap
    async fn terminate(&mut self, grace: Duration) -> PortalResult<Option<i32>>;
}

/// The single channel through which the crate touches the system
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion. A non-zero exit is returned as
    /// [`PortalError::CommandFailed`] with both outputs attached.
    async fn run(&self, invocation: &Invocation) -> PortalResult<CommandOutput>;

    /// Start a supervised child process
    async fn spawn(&self, invocation: &Invocation) -> PortalResult<Box<dyn ChildProcess>>;
}

/// Runs real processes with tokio
pub struct SystemExecutor {
    default_timeout: Duration,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(&self, invocation: &Invocation) -> PortalResult<CommandOutput> {
        let cmd_str = invocation.to_string();
        let limit = invocation.timeout.unwrap_or(self.default_timeout);
        debug!("Running: {}", cmd_str);

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, child).await {
            Ok(result) => result.map_err(|e| PortalError::CommandFailed {
                cmd: cmd_str.clone(),
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            })?,
            Err(_) => {
                return Err(PortalError::Timeout {
                    cmd: cmd_str,
                    after: limit,
                })
            }
        };

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        };

        if !output.status.success() {
            return Err(PortalError::CommandFailed {
                cmd: cmd_str,
                code: captured.code,
                stdout: captured.stdout,
                stderr: captured.stderr,
            });
        }

        Ok(captured)
    }

    async fn spawn(&self, invocation: &Invocation) -> PortalResult<Box<dyn ChildProcess>> {
        let cmd_str = invocation.to_string();
        debug!("Spawning: {}", cmd_str);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PortalError::CommandFailed {
                cmd: cmd_str,
                code: None,
                stdout: String::new(),
                stderr: e.to_string(),
            })?;

        // Foreground daemons log to stderr; forward it so the pipe never fills.
        if let Some(stderr) = child.stderr.take() {
            let program = invocation.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(program = %program, "{}", line);
                }
            });
        }

        Ok(Box::new(SystemChild {
            name: invocation.program.clone(),
            child,
        }))
    }
}

/// A tokio child owned by the supervisor
struct SystemChild {
    name: String,
    child: Child,
}

#[async_trait]
impl ChildProcess for SystemChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> PortalResult<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    async fn terminate(&mut self, grace: Duration) -> PortalResult<Option<i32>> {
        if let Some(status) = self.child.try_wait()? {
            debug!("{} already exited with {}", self.name, status);
            return Ok(status.code());
        }

        if let Some(pid) = self.child.id() {
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!("Failed to send SIGTERM to {} (pid {})", self.name, pid);
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("{} exited with {}", self.name, status);
                Ok(status.code())
            }
            Err(_) => {
                warn!("{} ignored SIGTERM for {:?}, killing", self.name, grace);
                self.child.kill().await?;
                Ok(self.child.wait().await?.code())
            }
        }
    }
}

/// Records every invocation and answers from a script
///
/// Responses are matched by prefix against the rendered command line; the
/// most recently scripted match wins. Unscripted commands succeed with empty
/// output.
#[derive(Default)]
pub struct RecordingExecutor {
    script: Mutex<Vec<(String, Scripted)>>,
    calls: Mutex<Vec<Invocation>>,
    spawned: Mutex<Vec<Invocation>>,
    terminations: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    Fail(CommandOutput),
    ExitEarly(i32),
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with a successful `stdout`
    pub fn respond(&self, prefix: &str, stdout: &str) {
        lock(&self.script).push((
            prefix.to_string(),
            Scripted::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                code: Some(0),
            }),
        ));
    }

    /// Fail commands starting with `prefix` with the given exit code and stderr
    pub fn fail(&self, prefix: &str, code: i32, stderr: &str) {
        lock(&self.script).push((
            prefix.to_string(),
            Scripted::Fail(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                code: Some(code),
            }),
        ));
    }

    /// Spawned children matching `prefix` report as already exited
    pub fn exit_early(&self, prefix: &str, code: i32) {
        lock(&self.script).push((prefix.to_string(), Scripted::ExitEarly(code)));
    }

    /// Everything passed to `run`, in order
    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.calls).clone()
    }

    /// Rendered command lines passed to `run`
    pub fn command_lines(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.to_string()).collect()
    }

    /// Everything passed to `spawn`, in order
    pub fn spawned(&self) -> Vec<Invocation> {
        lock(&self.spawned).clone()
    }

    /// How many spawned children were terminated
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    fn lookup(&self, line: &str) -> Option<Scripted> {
        lock(&self.script)
            .iter()
            .rev()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, scripted)| scripted.clone())
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, invocation: &Invocation) -> PortalResult<CommandOutput> {
        let line = invocation.to_string();
        lock(&self.calls).push(invocation.clone());

        match self.lookup(&line) {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Fail(output)) => Err(PortalError::CommandFailed {
                cmd: line,
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            _ => Ok(CommandOutput {
                code: Some(0),
                ..Default::default()
            }),
        }
    }

    async fn spawn(&self, invocation: &Invocation) -> PortalResult<Box<dyn ChildProcess>> {
        let line = invocation.to_string();
        lock(&self.spawned).push(invocation.clone());

        let exited = match self.lookup(&line) {
            Some(Scripted::ExitEarly(code)) => Some(code),
            Some(Scripted::Fail(output)) => {
                return Err(PortalError::CommandFailed {
                    cmd: line,
                    code: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            _ => None,
        };

        let pid = lock(&self.spawned).len() as u32;
        Ok(Box::new(RecordedChild {
            pid,
            exited,
            terminations: Arc::clone(&self.terminations),
        }))
    }
}

struct RecordedChild {
    pid: u32,
    exited: Option<i32>,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl ChildProcess for RecordedChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> PortalResult<Option<i32>> {
        Ok(self.exited)
    }

    async fn terminate(&mut self, _grace: Duration) -> PortalResult<Option<i32>> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.exited.unwrap_or(0)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
