//! IQ# CLI - command-line front end for the Q# kernel client
//!
//! Starts a kernel (or the mock kernel), waits for it to become ready and runs
//! a single directive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iqsharp_client::client::{Backend, ClientConfig, ConfigValue, Resolution};
use iqsharp_client::{Client, Timeout};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "iqsharp-cli")]
#[command(about = "Drive an IQ# kernel from the command line", long_about = None)]
struct Cli {
    /// Use the in-process mock kernel
    #[arg(long)]
    mock: bool,

    /// Full kernel command line (overrides QSHARP_KERNEL_COMMAND)
    #[arg(long)]
    kernel_command: Option<String>,

    /// Working directory for the kernel
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Readiness checks before giving up
    #[arg(long, default_value = "20")]
    attempts: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show kernel component versions
    Version,

    /// List available callables
    Who,

    /// Look up a namespace or callable
    Resolve {
        /// Fully qualified name
        name: String,
    },

    /// Show or change kernel settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Run raw code or a directive
    Exec {
        /// Code sent to the kernel
        code: String,

        /// Timeout in seconds (0 waits indefinitely)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a setting
    Set {
        /// Setting name
        name: String,

        /// New value (true/false, a number, or text)
        value: String,

        /// Persist settings afterwards
        #[arg(long)]
        save: bool,
    },

    /// Persist settings to the kernel's working directory
    Save,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if cli.mock {
        config.backend = Backend::Mock;
    }
    if let Some(command) = &cli.kernel_command {
        config.kernel_command = Some(command.split_whitespace().map(str::to_owned).collect());
    }
    config.working_dir = cli.dir.clone();
    config.readiness_attempts = cli.attempts;

    let client = Client::new(config).context("could not create the Q# client")?;
    client.start().context("could not start the IQ# kernel")?;

    match cli.command {
        Commands::Version => {
            for (component, version) in client.component_versions(Timeout::Default)? {
                println!("{component:<20} {version}");
            }
        }

        Commands::Who => {
            for name in client.available_operations()? {
                println!("{name}");
            }
        }

        Commands::Resolve { name } => match client.resolve(&name)? {
            Resolution::Callable(callable) => {
                println!("callable {} ({})", callable.name(), callable.origin().as_str())
            }
            Resolution::Namespace(info) => {
                println!("namespace {}", info.name);
                for child in info.children {
                    println!("  {child}.");
                }
                for callable in info.callables {
                    println!("  {callable}");
                }
            }
            Resolution::NotFound => println!("{name}: not found"),
        },

        Commands::Config { action: None } => {
            for (name, value) in client.get_config()? {
                println!("{name} = {}", iqsharp_client::codec::encode(&value));
            }
        }

        Commands::Config {
            action: Some(ConfigAction::Set { name, value, save }),
        } => {
            client.set_config(&name, ConfigValue::parse(&value))?;
            if save {
                client.save_config()?;
            }
            println!("{name} set");
        }

        Commands::Config {
            action: Some(ConfigAction::Save),
        } => {
            client.save_config()?;
            println!("Settings saved");
        }

        Commands::Exec { code, timeout } => {
            let timeout = match timeout {
                None => Timeout::Default,
                Some(0) => Timeout::Unbounded,
                Some(secs) => Timeout::After(Duration::from_secs(secs)),
            };
            let outcome = client.dispatch(
                &iqsharp_client::Command::raw(code),
                iqsharp_client::ExecuteOptions::default().timeout(timeout),
            )?;
            match outcome.content {
                Some(content) => println!("{}", serde_json::to_string_pretty(&content)?),
                None => println!("(no result)"),
            }
        }
    }

    client.stop();
    Ok(())
}
