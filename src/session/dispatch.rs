//! Command dispatch with the single-in-flight guarantee.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::demux::{DisplaySink, ReplyDemultiplexer};
use super::{DiagnosticHook, Session};
use crate::codec::{FromValue, Value};
use crate::error::{ClientError, Result, TransportError};
use crate::protocol::{Command, DisplayData};
use crate::transport::SessionTransport;

/// Dispatch timeout selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the client's default timeout.
    #[default]
    Default,
    /// Fail after the given duration.
    After(Duration),
    /// Wait as long as the kernel takes.
    Unbounded,
}

impl Timeout {
    /// Concrete limit given the client default.
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Timeout::Default => Some(default),
            Timeout::After(limit) => Some(limit),
            Timeout::Unbounded => None,
        }
    }
}

/// Per-dispatch options.
pub struct ExecuteOptions<'a> {
    /// Suppress pass-through display rendering.
    pub quiet: bool,
    /// Collect stderr lines as kernel errors.
    pub raise_on_stderr: bool,
    /// Timeout for the whole exchange.
    pub timeout: Timeout,
    /// Receives display payloads in place of the display sink.
    pub display_handler: Option<Box<dyn FnMut(&DisplayData) + 'a>>,
}

impl Default for ExecuteOptions<'_> {
    fn default() -> Self {
        Self {
            quiet: false,
            raise_on_stderr: true,
            timeout: Timeout::Default,
            display_handler: None,
        }
    }
}

impl<'a> ExecuteOptions<'a> {
    /// Enable quiet mode.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Choose whether stderr lines raise.
    pub fn raise_on_stderr(mut self, raise: bool) -> Self {
        self.raise_on_stderr = raise;
        self
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route display payloads to `handler`.
    pub fn on_display(mut self, handler: impl FnMut(&DisplayData) + 'a) -> Self {
        self.display_handler = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for ExecuteOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("quiet", &self.quiet)
            .field("raise_on_stderr", &self.raise_on_stderr)
            .field("timeout", &self.timeout)
            .field("display_handler", &self.display_handler.is_some())
            .finish()
    }
}

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    /// Decoded terminal result, absent when the kernel sent none.
    pub value: Option<Value>,
    /// Wire JSON of the terminal result before decoding.
    pub content: Option<serde_json::Value>,
}

impl Outcome {
    /// The decoded value, with `Null` standing in for an absent result.
    pub fn into_value(self) -> Value {
        self.value.unwrap_or(Value::Null)
    }

    /// Convert the value into a typed result for `directive`.
    pub fn extract<T: FromValue>(self, directive: &str) -> Result<T> {
        T::from_value(&self.into_value()).map_err(|detail| ClientError::UnexpectedResult {
            directive: directive.to_string(),
            detail,
        })
    }
}

/// Drives commands through the transport, one at a time.
pub struct CommandDispatcher {
    session: Arc<Session>,
    transport: Mutex<SessionTransport>,
    sink: Arc<dyn DisplaySink>,
    default_timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher over `transport`.
    pub fn new(
        transport: SessionTransport,
        sink: Arc<dyn DisplaySink>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            session: Arc::new(Session::new()),
            transport: Mutex::new(transport),
            sink,
            default_timeout,
        }
    }

    /// Session shared with diagnostic capture.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Timeout applied for [`Timeout::Default`].
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Start the kernel endpoint.
    pub fn start(&self) -> Result<()> {
        self.transport.lock().start()?;
        self.session.set_live(true);
        Ok(())
    }

    /// Send one command and collect its outcome.
    ///
    /// Fails with [`ClientError::AlreadyExecuting`] without blocking when a
    /// command is already in flight, including reentrant calls made from a
    /// display handler or diagnostic hook.
    pub fn dispatch(&self, command: &Command, options: ExecuteOptions<'_>) -> Result<Outcome> {
        let _busy = self
            .session
            .try_acquire()
            .ok_or(ClientError::AlreadyExecuting)?;
        let mut transport = self.transport.lock();

        let restarted = transport.ensure_alive().inspect_err(|_| self.session.set_live(false))?;
        if restarted {
            debug!("kernel (re)started before dispatch");
        }
        self.session.set_live(true);

        let timeout = options.timeout.resolve(self.default_timeout);
        debug!(code = %command.text(), ?timeout, "dispatching command");

        let hook: Option<DiagnosticHook> = self.session.hook();
        let mut demux = ReplyDemultiplexer::new(options, hook, self.sink.as_ref());
        demux.mark_sent();

        if let Err(err) = transport.execute(command, timeout, &mut |message| demux.accept(message)) {
            if matches!(err, TransportError::Closed | TransportError::Io(_)) {
                self.session.set_live(false);
            }
            debug!(error = %err, "dispatch failed");
            return Err(err.into());
        }

        let outcome = demux.finish();
        debug!(ok = outcome.is_ok(), "command completed");
        outcome
    }

    /// Check readiness with a quiet `%version`; never fails.
    ///
    /// Kernel warnings on stderr do not count against readiness.
    pub fn is_ready(&self, timeout: Duration) -> bool {
        let options = ExecuteOptions::default()
            .quiet()
            .raise_on_stderr(false)
            .timeout(Timeout::After(timeout));
        match self.dispatch(&Command::directive("version", None), options) {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "readiness check failed");
                false
            }
        }
    }

    /// Stop the kernel endpoint. Idempotent.
    pub fn stop(&self) {
        self.transport.lock().stop();
        self.session.set_live(false);
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("session", &self.session)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}
