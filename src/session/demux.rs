//! Reply stream demultiplexing for one in-flight command.
//!
//! Each reply message is classified by kind and routed: terminal results are
//! accumulated, stderr lines become errors when requested, display payloads go
//! through the diagnostic hook before reaching the display sink, and every
//! other message falls through to the sink unchanged.

use tracing::{debug, info, warn};

use super::DiagnosticHook;
use super::diagnostics::is_diagnostic;
use super::dispatch::{ExecuteOptions, Outcome};
use crate::codec;
use crate::error::{ClientError, KernelError, Result};
use crate::protocol::{DisplayData, ReplyMessage, StreamName};

/// Destination for display payloads and passthrough messages.
pub trait DisplaySink: Send + Sync {
    /// Render a display payload.
    fn display(&self, data: &DisplayData);

    /// Handle a message no built-in handler claimed.
    fn passthrough(&self, message: &ReplyMessage);
}

/// Display sink that writes everything to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn display(&self, data: &DisplayData) {
        match data.text() {
            Some(text) => info!(target: "iqsharp::display", "{text}"),
            None => info!(
                target: "iqsharp::display",
                media_types = ?data.data.keys().collect::<Vec<_>>(),
                "display data"
            ),
        }
    }

    fn passthrough(&self, message: &ReplyMessage) {
        match message {
            ReplyMessage::Stream { name, text } => {
                info!(target: "iqsharp::display", stream = name.as_str(), "{}", text.trim_end())
            }
            other => debug!(msg_type = other.msg_type(), "unhandled kernel message"),
        }
    }
}

/// Demultiplexer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Handlers set up, nothing sent.
    Idle,
    /// Command sent, no reply seen yet.
    Sent,
    /// At least one reply message routed.
    Collecting,
    /// Stream finished and outcome assembled.
    Done,
}

/// Per-command reply state machine.
pub struct ReplyDemultiplexer<'a> {
    state: DemuxState,
    options: ExecuteOptions<'a>,
    hook: Option<DiagnosticHook>,
    sink: &'a dyn DisplaySink,
    result: Option<ReplyMessage>,
    errors: Vec<String>,
}

impl<'a> ReplyDemultiplexer<'a> {
    /// Set up handlers; `hook` is the diagnostic hook installed right now.
    pub fn new(
        options: ExecuteOptions<'a>,
        hook: Option<DiagnosticHook>,
        sink: &'a dyn DisplaySink,
    ) -> Self {
        Self {
            state: DemuxState::Idle,
            options,
            hook,
            sink,
            result: None,
            errors: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Record that the command went out.
    pub fn mark_sent(&mut self) {
        self.state = DemuxState::Sent;
    }

    /// Route one reply message.
    pub fn accept(&mut self, message: ReplyMessage) {
        if self.state == DemuxState::Sent {
            self.state = DemuxState::Collecting;
        }

        match message {
            ReplyMessage::ExecuteResult(_) | ReplyMessage::ExecutionPath(_) => {
                if self.result.is_some() {
                    warn!(
                        msg_type = message.msg_type(),
                        "kernel sent more than one result for a command, keeping the first"
                    );
                    debug_assert!(false, "more than one terminal result for one command");
                } else {
                    self.result = Some(message);
                }
            }
            ReplyMessage::Stream {
                name: StreamName::Stderr,
                text,
            } if self.options.raise_on_stderr => self.errors.push(text),
            ReplyMessage::Display(data) => self.route_display(&data),
            other => self.sink.passthrough(&other),
        }
    }

    fn route_display(&mut self, data: &DisplayData) {
        let forward = match &self.hook {
            Some(hook) if is_diagnostic(data) => hook(data),
            _ => true,
        };
        if !forward {
            return;
        }

        if let Some(handler) = self.options.display_handler.as_mut() {
            handler(data);
        } else if !self.options.quiet {
            self.sink.display(data);
        }
    }

    /// Close the stream and assemble the outcome.
    pub fn finish(mut self) -> Result<Outcome> {
        self.state = DemuxState::Done;

        if !self.errors.is_empty() {
            return Err(ClientError::Kernel(KernelError::new(self.errors)));
        }

        let content = match self.result {
            None => None,
            Some(ReplyMessage::ExecutionPath(path)) => Some(path),
            Some(ReplyMessage::ExecuteResult(data)) => data.structured()?,
            Some(_) => None,
        };
        let value = content.as_ref().map(codec::decode).transpose()?;
        Ok(Outcome { value, content })
    }
}
