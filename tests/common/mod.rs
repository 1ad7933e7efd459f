//! Shared stubs for client integration tests.

#![allow(dead_code)]

use iqsharp_client::client::{Client, ClientConfig};
use iqsharp_client::error::{TransportError, TransportResult};
use iqsharp_client::protocol::{Command, DisplayData, ReplyMessage, StreamName};
use iqsharp_client::session::DisplaySink;
use iqsharp_client::transport::KernelTransport;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What the stub kernel does for the next command.
pub enum Step {
    /// Deliver these messages, then complete.
    Reply(Vec<ReplyMessage>),
    /// Fail with a transport timeout.
    Timeout,
    /// Die while handling the command.
    Die,
}

/// Shared script driving a [`ScriptedTransport`].
#[derive(Clone, Default)]
pub struct Script {
    steps: Arc<Mutex<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
    timeouts: Arc<Mutex<Vec<Option<Duration>>>>,
    starts: Arc<AtomicUsize>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step: Step) -> &Self {
        self.steps.lock().push_back(step);
        self
    }

    pub fn reply(&self, messages: Vec<ReplyMessage>) -> &Self {
        self.push(Step::Reply(messages))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> Box<dyn KernelTransport> {
        Box::new(ScriptedTransport {
            script: self.clone(),
            alive: false,
        })
    }
}

struct ScriptedTransport {
    script: Script,
    alive: bool,
}

impl KernelTransport for ScriptedTransport {
    fn start(&mut self) -> TransportResult<()> {
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        self.alive = true;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn execute(
        &mut self,
        command: &Command,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()> {
        self.script.sent.lock().push(command.text().to_string());
        self.script.timeouts.lock().push(timeout);
        let step = self.script.steps.lock().pop_front();
        match step {
            Some(Step::Reply(messages)) => {
                for message in messages {
                    sink(message);
                }
                Ok(())
            }
            Some(Step::Timeout) => Err(TransportError::Timeout(timeout.unwrap_or_default())),
            Some(Step::Die) => {
                self.alive = false;
                Err(TransportError::Closed)
            }
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) -> TransportResult<()> {
        self.alive = false;
        Ok(())
    }
}

/// Display sink remembering everything it was given.
#[derive(Default)]
pub struct RecordingSink {
    pub displayed: Mutex<Vec<DisplayData>>,
    pub passed: Mutex<Vec<ReplyMessage>>,
}

impl DisplaySink for RecordingSink {
    fn display(&self, data: &DisplayData) {
        self.displayed.lock().push(data.clone());
    }

    fn passthrough(&self, message: &ReplyMessage) {
        self.passed.lock().push(message.clone());
    }
}

/// Client over `script` with fast readiness polling.
pub fn client(script: &Script, sink: Arc<RecordingSink>) -> Client {
    let config = ClientConfig {
        readiness_attempts: 3,
        readiness_delay_ms: 0,
        ..ClientConfig::default()
    };
    Client::with_transport(config, script.transport(), sink)
}

/// Terminal result carrying `payload` (JSON text) under the current media type.
pub fn result(payload: &str) -> ReplyMessage {
    ReplyMessage::classify(
        "execute_result",
        json!({"data": {"application/x-qsharp-data": payload}, "metadata": {}}),
    )
}

/// Terminal result using the legacy media type.
pub fn legacy_result(payload: &str) -> ReplyMessage {
    ReplyMessage::classify(
        "execute_result",
        json!({"data": {"application/json": payload}, "metadata": {}}),
    )
}

pub fn stderr(text: &str) -> ReplyMessage {
    ReplyMessage::Stream {
        name: StreamName::Stderr,
        text: text.to_string(),
    }
}

/// Display message with structured diagnostic data.
pub fn diagnostic(payload: serde_json::Value) -> ReplyMessage {
    ReplyMessage::Display(DisplayData::qsharp(&payload))
}

/// Display message with only a text rendering.
pub fn plain(text: &str) -> ReplyMessage {
    ReplyMessage::Display(DisplayData::default().with_text(text))
}
