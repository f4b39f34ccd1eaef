//! Remote shell processes and the framing used to run commands over them.
//!
//! A shell is a long-lived child process (normally `ssh` running `sh` on the
//! intermediary host) whose stdin receives commands and whose stdout carries
//! their output. Each command is wrapped in a frame that ends with a line
//! containing a per-command random marker and the exit status:
//!
//! ```text
//! { <command>
//! } </dev/null 2>&1; printf '%s:%d\n' '<marker>' "$?"
//! ```
//!
//! The reader forwards everything before the marker to an [`OutputSink`] as
//! it arrives, so embedded newlines or control characters in the output can
//! never be mistaken for the end of a command.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{RemoteOs, SshConfig};
use crate::error::{BridgeError, Result};
use crate::redact::redact_for_log;

const HANDSHAKE_TOKEN: &str = "ragbridge-ready";
const STDERR_TAIL_CHARS: usize = 2048;

/// Receives command output incrementally.
pub trait OutputSink: Send {
    /// Called with each piece of output as soon as it is read.
    fn accept(&mut self, chunk: &[u8]);
}

impl OutputSink for Vec<u8> {
    fn accept(&mut self, chunk: &[u8]) {
        self.extend_from_slice(chunk);
    }
}

/// An authenticated shell on the remote host.
///
/// Commands run strictly one after another; a shell is never shared by
/// concurrent commands.
#[async_trait]
pub trait RemoteShell: Send {
    /// Run `command`, streaming its merged stdout/stderr into `sink`, and
    /// return its exit status.
    async fn run(&mut self, command: &str, sink: &mut dyn OutputSink) -> Result<i32>;

    /// Cheap liveness check that does not touch the remote side.
    fn is_alive(&mut self) -> bool;

    /// Terminate the shell.
    async fn close(&mut self);
}

/// Opens new shells. The bridge calls this once per (re)connection.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Description of the target for logs, e.g. `ops@gateway:22`.
    fn target(&self) -> String;

    /// Credentials reference recorded on the session (never the secret).
    fn credentials(&self) -> Option<String> {
        None
    }

    /// Open and authenticate a shell.
    async fn connect(&self) -> Result<Box<dyn RemoteShell>>;
}

/// Wrap `command` in the end-of-output frame for the given remote OS.
///
/// On Unix the command runs in a subshell, so `exit`, `cd` and assignments
/// leave the session shell untouched.
pub fn frame_command(os: RemoteOs, command: &str, marker: &str) -> String {
    match os {
        RemoteOs::Unix => {
            format!("( {command}\n) </dev/null 2>&1; printf '%s:%d\\n' '{marker}' \"$?\"\n")
        }
        RemoteOs::Windows => format!(
            "$global:LASTEXITCODE = 0; try {{ & {{ {command} }} 2>&1 | ForEach-Object {{ \"$_\" }}; \
             $rbok = $?; $rbc = if ($global:LASTEXITCODE) {{ $global:LASTEXITCODE }} elseif ($rbok) {{ 0 }} else {{ 1 }} }} \
             catch {{ \"$_\"; $rbc = 1 }}; Write-Output ('{marker}:' + $rbc)\n"
        ),
    }
}

/// Look for the frame marker in `line`.
///
/// Returns the number of output bytes preceding the marker and the exit
/// status that follows it.
pub fn find_marker(line: &[u8], marker: &str) -> Option<(usize, i32)> {
    let needle = marker.as_bytes();
    let start = line
        .windows(needle.len())
        .position(|window| window == needle)?;
    let rest = line.get(start + needle.len()..)?;
    let rest = std::str::from_utf8(rest).ok()?;
    let code = rest.strip_prefix(':')?.trim_end_matches(['\r', '\n']).trim();
    let code = code.parse().ok()?;
    Some((start, code))
}

/// A shell backed by a local child process.
pub struct ProcessShell {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<String>>,
    os: RemoteOs,
}

impl ProcessShell {
    /// Spawn `command` with piped stdio.
    pub fn spawn(mut command: Command, os: RemoteOs) -> Result<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Protocol("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Protocol("child stdout unavailable".to_string()))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("remote stderr: {}", redact_for_log(&line, 200));
                    if let Ok(mut buf) = tail.lock() {
                        buf.push_str(&line);
                        buf.push('\n');
                        if buf.len() > STDERR_TAIL_CHARS {
                            let cut = buf.len() - STDERR_TAIL_CHARS;
                            let cut = (cut..buf.len())
                                .find(|i| buf.is_char_boundary(*i))
                                .unwrap_or(buf.len());
                            buf.drain(..cut);
                        }
                    }
                }
            });
        }

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_tail,
            os,
        })
    }

    /// Spawn `command` and confirm the remote side executes framed commands.
    pub async fn spawn_and_handshake(
        command: Command,
        os: RemoteOs,
        timeout: Duration,
    ) -> Result<Self> {
        let mut shell = Self::spawn(command, os)?;
        let mut output = Vec::new();
        let handshake = tokio::time::timeout(
            timeout,
            shell.run(&format!("echo {HANDSHAKE_TOKEN}"), &mut output),
        )
        .await;

        match handshake {
            Ok(Ok(0)) if String::from_utf8_lossy(&output).contains(HANDSHAKE_TOKEN) => Ok(shell),
            Ok(Ok(code)) => {
                let reason = format!("handshake exited with status {code}{}", shell.stderr_suffix());
                shell.close().await;
                Err(BridgeError::Protocol(reason))
            }
            Ok(Err(e)) => {
                let reason = format!("{e}{}", shell.stderr_suffix());
                shell.close().await;
                Err(BridgeError::Protocol(reason))
            }
            Err(_) => {
                shell.close().await;
                Err(BridgeError::Timeout {
                    operation: "shell handshake".to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Recent stderr output, for diagnostics.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|buf| buf.trim().to_string())
            .unwrap_or_default()
    }

    fn stderr_suffix(&self) -> String {
        let tail = self.stderr_tail();
        if tail.is_empty() {
            String::new()
        } else {
            format!(" (stderr: {})", redact_for_log(&tail, 300))
        }
    }
}

#[async_trait]
impl RemoteShell for ProcessShell {
    async fn run(&mut self, command: &str, sink: &mut dyn OutputSink) -> Result<i32> {
        let marker = format!("__ragbridge_{}__", Uuid::new_v4().simple());
        let script = frame_command(self.os, command, &marker);

        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = self.stdout.read_until(b'\n', &mut line).await?;
            if read == 0 {
                // Give the stderr reader a moment to collect the reason.
                tokio::time::sleep(Duration::from_millis(50)).await;
                return Err(BridgeError::Protocol(format!(
                    "remote shell closed its output{}",
                    self.stderr_suffix()
                )));
            }

            if let Some((prefix_len, code)) = find_marker(&line, &marker) {
                if let Some(prefix) = line.get(..prefix_len) {
                    if !prefix.is_empty() {
                        sink.accept(prefix);
                    }
                }
                return Ok(code);
            }

            sink.accept(&line);
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn close(&mut self) {
        let _ = self.stdin.write_all(b"exit\n").await;
        let _ = self.stdin.flush().await;
        if tokio::time::timeout(Duration::from_millis(500), self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.kill().await;
        }
    }
}

/// Opens shells with the system `ssh` client.
pub struct SshConnector {
    ssh: SshConfig,
    os: RemoteOs,
}

impl SshConnector {
    pub fn new(ssh: SshConfig, os: RemoteOs) -> Self {
        Self { ssh, os }
    }

    /// Arguments passed to the ssh client.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-p".to_string(),
            self.ssh.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.ssh.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.ssh.strict_host_key_checking),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ];

        if let Some(identity) = &self.ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }

        args.extend(self.ssh.extra_args.iter().cloned());
        args.push(self.ssh.destination());

        let remote_shell = self.ssh.remote_shell.clone().unwrap_or_else(|| match self.os {
            RemoteOs::Unix => "sh".to_string(),
            RemoteOs::Windows => {
                "powershell -NoLogo -NoProfile -NonInteractive -Command -".to_string()
            }
        });
        args.push(remote_shell);
        args
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    fn target(&self) -> String {
        format!("{}:{}", self.ssh.destination(), self.ssh.port)
    }

    fn credentials(&self) -> Option<String> {
        self.ssh
            .identity_file
            .as_ref()
            .map(|path| path.display().to_string())
    }

    async fn connect(&self) -> Result<Box<dyn RemoteShell>> {
        info!("Opening ssh session to {}", self.target());

        let mut command = Command::new(&self.ssh.program);
        command.args(self.args());

        // Allow for key exchange and authentication on top of the TCP connect.
        let timeout = Duration::from_secs(self.ssh.connect_timeout_secs.saturating_mul(2).max(5));
        let shell = ProcessShell::spawn_and_handshake(command, self.os, timeout).await?;
        Ok(Box::new(shell))
    }
}

/// Opens shells by spawning a local program, e.g. `sh`.
///
/// Used for development against services reachable from this machine and
/// for exercising the framing without an ssh server.
pub struct LocalShellConnector {
    program: String,
    args: Vec<String>,
    os: RemoteOs,
}

impl LocalShellConnector {
    /// Spawn `sh` on a Unix host.
    pub fn new() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            os: RemoteOs::Unix,
        }
    }

    /// Spawn a different program.
    pub fn with_program(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Set the shell flavour.
    pub fn with_os(mut self, os: RemoteOs) -> Self {
        self.os = os;
        self
    }
}

impl Default for LocalShellConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShellConnector for LocalShellConnector {
    fn target(&self) -> String {
        format!("local:{}", self.program)
    }

    async fn connect(&self) -> Result<Box<dyn RemoteShell>> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        let shell =
            ProcessShell::spawn_and_handshake(command, self.os, Duration::from_secs(10)).await;
        match shell {
            Ok(shell) => Ok(Box::new(shell)),
            Err(e) => {
                warn!("Local shell {} failed to start: {e}", self.program);
                Err(e)
            }
        }
    }
}
