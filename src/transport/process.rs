//! Child-process kernel transport.
//!
//! The kernel runs as a child process and exchanges newline-delimited JSON
//! frames over its stdin/stdout; stderr is inherited. The transport owns a
//! current-thread tokio runtime and blocks on each exchange, so callers stay
//! synchronous while I/O and timeouts are driven by tokio.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{KernelTransport, USER_AGENT_ENV};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{Command, KernelFrame, ReplyMessage, RequestFrame};

/// How long a kernel gets to exit after a shutdown request before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the kernel process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Value exported as `IQSHARP_USER_AGENT`.
    pub user_agent: String,
    /// Working directory of the kernel (settings files land here).
    pub working_dir: Option<PathBuf>,
}

impl KernelSpec {
    /// Build a spec from a full command line.
    pub fn from_command<I, S>(command: I, user_agent: impl Into<String>) -> TransportResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parts = command.into_iter().map(Into::into);
        let program = parts.next().ok_or(TransportError::EmptyCommand)?;
        if program.is_empty() {
            return Err(TransportError::EmptyCommand);
        }
        Ok(Self {
            program,
            args: parts.collect(),
            user_agent: user_agent.into(),
            working_dir: None,
        })
    }

    /// Run the kernel in `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

struct KernelProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl KernelProcess {
    async fn send(&mut self, request: &RequestFrame) -> TransportResult<()> {
        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        self.stdin.write_all(&payload).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn exchange(
        &mut self,
        request: &RequestFrame,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()> {
        self.send(request).await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or(TransportError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }

            let frame: KernelFrame = serde_json::from_str(&line)
                .map_err(|err| TransportError::MalformedFrame(err.to_string()))?;
            if frame.parent_header.msg_id != request.msg_id() {
                debug!(
                    parent = %frame.parent_header.msg_id,
                    msg_type = %frame.msg_type,
                    "dropping frame for another request"
                );
                continue;
            }
            if frame.is_reply() {
                return Ok(());
            }
            sink(frame.into_message());
        }
    }
}

/// Kernel transport backed by a child process.
pub struct ProcessTransport {
    spec: KernelSpec,
    runtime: Runtime,
    session_id: String,
    process: Option<KernelProcess>,
}

impl ProcessTransport {
    /// Prepare a transport for the given kernel; the process starts on `start`.
    pub fn new(spec: KernelSpec) -> TransportResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            spec,
            runtime,
            session_id: Uuid::new_v4().to_string(),
            process: None,
        })
    }

    /// Launch spec of this transport.
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    fn spawn(&self) -> TransportResult<KernelProcess> {
        let _guard = self.runtime.enter();

        let mut command = ProcessCommand::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .env(USER_AGENT_ENV, &self.spec.user_agent)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            program: self.spec.program.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;

        Ok(KernelProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }
}

impl KernelTransport for ProcessTransport {
    fn start(&mut self) -> TransportResult<()> {
        if self.process.is_some() {
            return Ok(());
        }
        let process = self.spawn()?;
        info!(
            program = %self.spec.program,
            pid = ?process.child.id(),
            "kernel process started"
        );
        self.process = Some(process);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => matches!(process.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn execute(
        &mut self,
        command: &Command,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()> {
        let process = self.process.as_mut().ok_or(TransportError::NotStarted)?;
        let request = RequestFrame::execute(&self.session_id, &self.spec.user_agent, command);
        debug!(msg_id = %request.msg_id(), code = %command.text(), "sending command");

        let exchange = process.exchange(&request, sink);
        match timeout {
            Some(limit) => self
                .runtime
                .block_on(async { tokio::time::timeout(limit, exchange).await })
                .unwrap_or_else(|_| {
                    debug!(?limit, "command timed out");
                    Err(TransportError::Timeout(limit))
                }),
            None => self.runtime.block_on(exchange),
        }
    }

    fn shutdown(&mut self) -> TransportResult<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        let request = RequestFrame::shutdown(&self.session_id, &self.spec.user_agent);

        self.runtime.block_on(async move {
            if let Err(err) = process.send(&request).await {
                debug!(error = %err, "could not deliver shutdown request");
            }
            match tokio::time::timeout(SHUTDOWN_GRACE, process.child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    info!(?status, "kernel process exited");
                }
                Err(_) => {
                    warn!("kernel ignored shutdown request, killing it");
                    process.child.kill().await?;
                }
            }
            Ok::<(), TransportError>(())
        })
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut() {
            let _ = process.child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            KernelSpec::from_command(Vec::<String>::new(), "ua"),
            Err(TransportError::EmptyCommand)
        ));
        assert!(matches!(
            KernelSpec::from_command([""], "ua"),
            Err(TransportError::EmptyCommand)
        ));
    }

    #[test]
    fn execute_before_start_fails() {
        let spec = KernelSpec::from_command(["iqsharp", "--stdio"], "ua").unwrap();
        assert_eq!(spec.args, vec!["--stdio".to_string()]);
        let mut transport = ProcessTransport::new(spec).unwrap();
        assert!(!transport.is_alive());
        let result = transport.execute(&Command::raw("%who"), None, &mut |_| {});
        assert!(matches!(result, Err(TransportError::NotStarted)));
        assert!(transport.shutdown().is_ok());
    }

    #[test]
    fn spawn_failure_names_program() {
        let spec = KernelSpec::from_command(["definitely-not-a-kernel-binary"], "ua").unwrap();
        let mut transport = ProcessTransport::new(spec).unwrap();
        match transport.start() {
            Err(TransportError::Spawn { program, .. }) => {
                assert_eq!(program, "definitely-not-a-kernel-binary")
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }
}
