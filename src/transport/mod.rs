//! Kernel endpoint lifecycle.
//!
//! [`KernelTransport`] is the seam between the session layer and whatever
//! actually runs the kernel: a child process speaking NDJSON over stdio
//! ([`ProcessTransport`]) or the in-process emulator used for tests
//! ([`crate::mock::MockTransport`]). [`SessionTransport`] wraps a transport
//! with the start / liveness / restart / idempotent-stop contract.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::TransportResult;
use crate::protocol::{Command, ReplyMessage};

pub mod process;

pub use process::{KernelSpec, ProcessTransport};

/// Environment variable carrying the client's user agent into the kernel.
pub const USER_AGENT_ENV: &str = "IQSHARP_USER_AGENT";

/// A message-passing endpoint able to execute one command at a time.
pub trait KernelTransport: Send {
    /// Launch or attach the kernel endpoint.
    fn start(&mut self) -> TransportResult<()>;

    /// Whether the endpoint is still running.
    fn is_alive(&mut self) -> bool;

    /// Send `command` and deliver every reply message for it to `sink`, in
    /// arrival order, returning once the reply stream has completed.
    ///
    /// `timeout` bounds the whole exchange; `None` waits indefinitely.
    fn execute(
        &mut self,
        command: &Command,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()>;

    /// Stop the endpoint.
    fn shutdown(&mut self) -> TransportResult<()>;
}

/// Lifecycle wrapper around a [`KernelTransport`].
pub struct SessionTransport {
    inner: Box<dyn KernelTransport>,
    started: bool,
}

impl SessionTransport {
    /// Wrap a transport; nothing is started yet.
    pub fn new(inner: Box<dyn KernelTransport>) -> Self {
        Self {
            inner,
            started: false,
        }
    }

    /// Start the kernel endpoint.
    pub fn start(&mut self) -> TransportResult<()> {
        info!("starting IQ# kernel");
        self.inner.start()?;
        self.started = true;
        Ok(())
    }

    /// Whether [`SessionTransport::start`] succeeded and no stop followed.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the endpoint is running.
    pub fn is_alive(&mut self) -> bool {
        self.started && self.inner.is_alive()
    }

    /// Start the endpoint if needed, restarting it when the process died.
    ///
    /// Returns `true` when a (re)start happened.
    pub fn ensure_alive(&mut self) -> TransportResult<bool> {
        if !self.started {
            self.start()?;
            return Ok(true);
        }
        if self.inner.is_alive() {
            return Ok(false);
        }

        warn!("IQ# kernel is not running, restarting");
        if let Err(err) = self.inner.shutdown() {
            debug!(error = %err, "cleanup of dead kernel failed");
        }
        self.started = false;
        self.start()?;
        Ok(true)
    }

    /// Execute one command on the running endpoint.
    pub fn execute(
        &mut self,
        command: &Command,
        timeout: Option<Duration>,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()> {
        self.inner.execute(command, timeout, sink)
    }

    /// Stop the endpoint. Idempotent; failures are swallowed.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        if let Err(err) = self.inner.shutdown() {
            debug!(error = %err, "kernel shutdown failed");
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct FlakyTransport {
        counters: Arc<Counters>,
        alive: bool,
    }

    impl KernelTransport for FlakyTransport {
        fn start(&mut self) -> TransportResult<()> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            self.alive = true;
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn execute(
            &mut self,
            _command: &Command,
            _timeout: Option<Duration>,
            _sink: &mut dyn FnMut(ReplyMessage),
        ) -> TransportResult<()> {
            // Simulates the kernel dying after each command.
            self.alive = false;
            Ok(())
        }

        fn shutdown(&mut self) -> TransportResult<()> {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::TransportError::Closed)
        }
    }

    fn flaky() -> (SessionTransport, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let transport = SessionTransport::new(Box::new(FlakyTransport {
            counters: Arc::clone(&counters),
            alive: false,
        }));
        (transport, counters)
    }

    #[test]
    fn ensure_alive_restarts_dead_kernel() {
        let (mut transport, counters) = flaky();
        assert!(transport.ensure_alive().unwrap());
        assert!(!transport.ensure_alive().unwrap());

        transport
            .execute(&Command::raw("%who"), None, &mut |_| {})
            .unwrap();
        assert!(!transport.is_alive());
        assert!(transport.ensure_alive().unwrap());
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
        assert!(transport.is_alive());
    }

    #[test]
    fn stop_is_idempotent_and_swallows_errors() {
        let (mut transport, counters) = flaky();
        transport.start().unwrap();
        transport.stop();
        transport.stop();
        drop(transport);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }
}
