//! Process supervisor — owns one agent subprocess and its three pipes.
//!
//! Lifecycle: `NotStarted → Running → Exited`. The input pipe is closed
//! before waiting for exit (closing stdin is the signal the agent uses to
//! begin producing output), the output pipe has a single reader, stderr is
//! drained by a background task, and the exit status is observed on every
//! path including cancellation.

use cicd_core::error::{Error, Result};
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);
pub const MAX_PROMPT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Window between termination request and force-kill.
    pub grace: Duration,
    /// Hard ceiling on prompt size, checked before spawn.
    pub max_prompt_bytes: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            max_prompt_bytes: MAX_PROMPT_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited,
}

pub struct Supervisor {
    binary: String,
    options: SupervisorOptions,
    state: ProcessState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr_lines: Arc<Mutex<Vec<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    exit_status: Option<ExitStatus>,
}

impl Supervisor {
    pub fn new(binary: impl Into<String>, options: SupervisorOptions) -> Self {
        Self {
            binary: binary.into(),
            options,
            state: ProcessState::NotStarted,
            child: None,
            stdin: None,
            stdout: None,
            stderr_lines: Arc::new(Mutex::new(Vec::new())),
            stderr_task: None,
            exit_status: None,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Everything the child wrote to stderr so far, newline-joined.
    pub fn stderr_output(&self) -> String {
        self.stderr_lines
            .lock()
            .expect("stderr buffer poisoned")
            .join("\n")
    }

    /// Reject a prompt before any subprocess exists: empty, NUL bytes, or
    /// over the byte ceiling are `invalid_input`, never a child crash.
    pub fn validate_prompt(&self, prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(Error::invalid_input("prompt is empty"));
        }
        if prompt.bytes().any(|b| b == 0) {
            return Err(Error::invalid_input("prompt contains NUL bytes"));
        }
        if prompt.len() > self.options.max_prompt_bytes {
            return Err(Error::invalid_input(format!(
                "prompt is {} bytes, ceiling is {}",
                prompt.len(),
                self.options.max_prompt_bytes
            )));
        }
        Ok(())
    }

    /// Spawn the agent with the given arguments and environment additions.
    pub fn start(&mut self, args: &[String], env: &HashMap<String, String>) -> Result<()> {
        if self.state != ProcessState::NotStarted {
            return Err(Error::InvalidState(format!(
                "supervisor already started ({:?})",
                self.state
            )));
        }

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AgentNotFound(format!("`{}` is not on PATH", self.binary))
            } else {
                Error::Unknown(format!("spawn {}: {e}", self.binary))
            }
        })?;

        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);

        // Single reader for stderr: a drain task that buffers lines for
        // later classification and keeps the pipe from filling up.
        if let Some(stderr) = child.stderr.take() {
            let buffer = self.stderr_lines.clone();
            self.stderr_task = Some(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buffer.lock().expect("stderr buffer poisoned").push(line);
                }
            }));
        }

        debug!(binary = %self.binary, pid = ?child.id(), "agent spawned");
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Write the full prompt and close stdin.
    pub async fn write_prompt(&mut self, prompt: &str) -> Result<()> {
        self.validate_prompt(prompt)?;
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::InvalidState("stdin not available".into()))?;
        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| Error::Unknown(format!("write prompt: {e}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| Error::Unknown(format!("close stdin: {e}")))?;
        drop(stdin);
        Ok(())
    }

    /// Take the output line sequence: lazy, finite, non-restartable.
    pub fn take_output_lines(&mut self) -> Result<Lines<BufReader<ChildStdout>>> {
        self.stdout
            .take()
            .map(|reader| reader.lines())
            .ok_or_else(|| Error::InvalidState("output stream already taken".into()))
    }

    /// Block until the process exits or `cancel` fires. On cancellation the
    /// child gets a termination signal, then `grace` to leave, then a kill.
    /// The exit status is reaped on both paths.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no child to wait for".into()))?;

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::Unknown(format!("wait: {e}")))?
            }
            _ = cancel.cancelled() => {
                debug!(binary = %self.binary, "cancellation requested, terminating agent");
                let grace = self.options.grace;
                Self::terminate(child);
                let status = tokio::select! {
                    status = child.wait() => {
                        status.map_err(|e| Error::Unknown(format!("wait: {e}")))?
                    }
                    _ = tokio::time::sleep(grace) => {
                        warn!(binary = %self.binary, "grace elapsed, force-killing agent");
                        let _ = child.kill().await;
                        child.wait().await
                            .map_err(|e| Error::Unknown(format!("wait after kill: {e}")))?
                    }
                };
                self.record_exit(status);
                return Err(Error::Cancelled);
            }
        };

        self.record_exit(status);
        Ok(status)
    }

    /// Idempotent termination. Remaining pipe contents are drained to
    /// discard so the child never deadlocks on a full output buffer.
    pub async fn stop(&mut self) {
        if self.state == ProcessState::Exited {
            return;
        }
        // Discard whatever output nobody consumed.
        if let Some(mut stdout) = self.stdout.take() {
            tokio::spawn(async move {
                let mut sink = Vec::new();
                let _ = stdout.read_to_end(&mut sink).await;
            });
        }
        drop(self.stdin.take());

        if let Some(mut child) = self.child.take() {
            Self::terminate(&mut child);
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = tokio::time::sleep(self.options.grace) => {
                    let _ = child.kill().await;
                    child.wait().await.ok()
                }
            };
            if let Some(status) = status {
                self.record_exit(status);
            }
        }
        self.state = ProcessState::Exited;
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(binary = %self.binary, code = ?status.code(), "agent exited");
        self.exit_status = Some(status);
        self.state = ProcessState::Exited;
        self.child = None;
    }

    /// Ask the child to exit. SIGTERM where the platform has it, hard kill
    /// elsewhere.
    #[cfg(unix)]
    fn terminate(child: &mut Child) {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        } else {
            let _ = child.start_kill();
        }
    }

    #[cfg(not(unix))]
    fn terminate(child: &mut Child) {
        let _ = child.start_kill();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // kill_on_drop handles a still-running child.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        write!(file, "{body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn prompt_validation() {
        let sup = Supervisor::new("claude", SupervisorOptions::default());
        assert!(sup.validate_prompt("   ").is_err());
        assert!(sup.validate_prompt("has\0nul").is_err());
        let big = "x".repeat(MAX_PROMPT_BYTES + 1);
        assert!(sup.validate_prompt(&big).is_err());
        assert!(sup.validate_prompt("review this diff").is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_agent_not_found() {
        let mut sup = Supervisor::new(
            "definitely-not-a-real-agent-binary",
            SupervisorOptions::default(),
        );
        let err = sup.start(&[], &no_env()).unwrap_err();
        assert_eq!(err.code(), cicd_core::ErrorCode::AgentNotFound);
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "echo-agent", "cat\n");

        let mut sup = Supervisor::new(&script, SupervisorOptions::default());
        sup.start(&[], &no_env()).unwrap();
        sup.write_prompt("hello agent\n").await.unwrap();

        let mut lines = sup.take_output_lines().unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "hello agent");
        assert!(lines.next_line().await.unwrap().is_none());

        let cancel = CancellationToken::new();
        let status = sup.wait(&cancel).await.unwrap();
        assert!(status.success());
        assert_eq!(sup.state(), ProcessState::Exited);
    }

    #[tokio::test]
    async fn wait_observes_nonzero_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "fail-agent", "cat >/dev/null\nexit 3\n");

        let mut sup = Supervisor::new(&script, SupervisorOptions::default());
        sup.start(&[], &no_env()).unwrap();
        sup.write_prompt("x").await.unwrap();
        let status = sup.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn cancellation_terminates_child() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "sleepy-agent", "cat >/dev/null\nexec sleep 60\n");

        let mut sup = Supervisor::new(
            &script,
            SupervisorOptions {
                grace: Duration::from_millis(300),
                ..Default::default()
            },
        );
        sup.start(&[], &no_env()).unwrap();
        sup.write_prompt("x").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let err = sup.wait(&cancel).await.unwrap_err();
        assert_eq!(err.code(), cicd_core::ErrorCode::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        // Exit status observed even on the cancellation path
        assert!(sup.exit_status().is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "chatty-agent", "yes data-line | head -100000\nexec sleep 60\n");

        let mut sup = Supervisor::new(
            &script,
            SupervisorOptions {
                grace: Duration::from_millis(200),
                ..Default::default()
            },
        );
        sup.start(&[], &no_env()).unwrap();
        sup.write_prompt("x").await.unwrap();

        sup.stop().await;
        sup.stop().await;
        assert_eq!(sup.state(), ProcessState::Exited);
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "noisy-agent",
            "cat >/dev/null\necho 'rate limit reached' >&2\n",
        );

        let mut sup = Supervisor::new(&script, SupervisorOptions::default());
        sup.start(&[], &no_env()).unwrap();
        sup.write_prompt("x").await.unwrap();
        sup.wait(&CancellationToken::new()).await.unwrap();
        // Give the drain task a beat to flush.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sup.stderr_output().contains("rate limit"));
    }
}
