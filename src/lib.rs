//! IQ# client – drives an interactive Q# kernel from Rust
//!
//! This crate implements the client side of the kernel protocol:
//! - Structural value translation, including tuple and numeric-array encodings
//! - Kernel process lifecycle with readiness polling and restart on death
//! - Single-in-flight command dispatch and reply demultiplexing
//! - Scoped capture of diagnostic display payloads
//! - Typed directives and an explicit namespace registry
//! - An in-process mock kernel for tests and side-by-side runs

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod codec;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export key types for convenience
pub use client::{CallableRef, Client, ClientConfig, ConfigValue, Resolution};
pub use codec::{FromValue, Value};
pub use error::{AzureError, ClientError, CodecError, KernelError, Result, TransportError};
pub use protocol::{Arguments, Command};
pub use session::{DiagnosticCapture, ExecuteOptions, Outcome, Timeout};

/// Current version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Product name reported in the user agent
pub const CLIENT_NAME: &str = "iqsharp-client";
