//! Error types for the IQ# client
//!
//! Each layer owns a `thiserror` enum; the client facade folds them into
//! [`ClientError`] through `#[from]` conversions.

use serde::Deserialize;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Top-level error returned by the client facade and the dispatcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A command was dispatched while another one is still in flight.
    #[error("cannot execute through the IQ# client while another execution is completing")]
    AlreadyExecuting,

    /// The kernel reported one or more errors on its error stream.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// An Azure Quantum directive reported a failure.
    #[error(transparent)]
    Azure(#[from] AzureError),

    /// Encoding or decoding a wire value failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport failed while starting, sending or receiving.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The kernel did not become ready within the readiness-polling budget.
    #[error("IQ# kernel was not available after {attempts} readiness checks")]
    TransportUnavailable {
        /// Number of readiness checks that were attempted
        attempts: u32,
    },

    /// A typed directive returned a value of an unexpected shape.
    #[error("unexpected result for {directive}: {detail}")]
    UnexpectedResult {
        /// Directive that produced the result
        directive: String,
        /// Description of the mismatch
        detail: String,
    },

    /// Local I/O failed (for example reading a QIR output file).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialising a directive argument failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the kernel while executing a command.
///
/// Lines are kept exactly as the kernel emitted them, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct KernelError {
    /// Error-stream lines observed during the command.
    pub lines: Vec<String>,
}

impl KernelError {
    /// Build a kernel error from the collected error-stream lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "The Q# kernel raised the following errors:")?;
        for line in &self.lines {
            write!(f, "    {line}")?;
        }
        Ok(())
    }
}

/// Failure payload returned by an Azure Quantum directive.
///
/// The kernel reports these as a result carrying `error_code` rather than on
/// its error stream.
#[derive(Debug, Clone, PartialEq, Eq, Error, Deserialize)]
#[error("{error_name} ({error_code}): {error_description}")]
pub struct AzureError {
    /// Numeric error code.
    pub error_code: i64,
    /// Symbolic error name.
    pub error_name: String,
    /// Human-readable description.
    pub error_description: String,
}

/// Value translation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// A tuple or array encoding is structurally invalid.
    #[error("malformed wire value: {0}")]
    MalformedWireValue(String),

    /// A value could not be coerced into an enumerated domain type.
    #[error("invalid {kind} value: {value}")]
    InvalidEnum {
        /// Name of the enumerated type
        kind: &'static str,
        /// Rendering of the rejected input
        value: String,
    },
}

/// Convenience result alias for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Kernel transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The kernel did not finish replying within the dispatch timeout.
    #[error("timed out after {0:?} waiting for the kernel to reply")]
    Timeout(Duration),

    /// The kernel closed its output stream.
    #[error("connection closed by kernel")]
    Closed,

    /// The kernel process could not be spawned.
    #[error("failed to start kernel `{program}`: {source}")]
    Spawn {
        /// Program that was launched
        program: String,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The kernel command line is empty.
    #[error("kernel command is empty")]
    EmptyCommand,

    /// The spawned kernel did not expose one of its stdio pipes.
    #[error("spawned kernel process did not expose {0}")]
    MissingPipe(&'static str),

    /// A command was sent before the transport was started.
    #[error("kernel transport has not been started")]
    NotStarted,

    /// The kernel sent a frame that does not follow the protocol.
    #[error("malformed kernel frame: {0}")]
    MalformedFrame(String),

    /// I/O error while talking to the kernel.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialisation error for frames.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
