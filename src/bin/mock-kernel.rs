//! `mock-kernel` – serves the mock Q# kernel over stdio.
//!
//! Speaks the same newline-delimited JSON protocol as a real kernel started
//! with `--stdio`, so clients can be exercised without a .NET installation.

use iqsharp_client::mock::MockKernel;
use iqsharp_client::transport::USER_AGENT_ENV;
use std::env;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let mut working_dir: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdio" => {
                // Stdio is the only transport; accept the flag for compatibility.
            }
            "--dir" => {
                let Some(path) = args.next() else {
                    eprintln!("--dir requires a path argument");
                    print_usage();
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "missing value for --dir",
                    ));
                };
                working_dir = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid command-line argument",
                ));
            }
        }
    }

    let working_dir = match working_dir {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    let mut kernel = MockKernel::new()
        .in_dir(working_dir)
        .with_user_agent(env::var(USER_AGENT_ENV).ok());

    let stdin = io::stdin();
    let stdout = io::stdout();
    kernel.serve(BufReader::new(stdin.lock()), BufWriter::new(stdout.lock()))
}

fn print_usage() {
    eprintln!("Usage: mock-kernel [--stdio] [--dir PATH]");
}
