//! Client facade: lifecycle, startup policy and typed directives.
//!
//! A [`Client`] is the explicit context object for one kernel session. It owns
//! the dispatcher (and through it the transport and session state) plus the
//! namespace registry. Tests inject a transport with [`Client::with_transport`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::{self, FromValue, Value};
use crate::error::{ClientError, Result, TransportResult};
use crate::mock::MockTransport;
use crate::protocol::{Arguments, Command};
use crate::session::{
    CommandDispatcher, DiagnosticCapture, DisplaySink, ExecuteOptions, LogSink, Outcome, Session,
    Timeout,
};
use crate::transport::{KernelSpec, KernelTransport, ProcessTransport, SessionTransport};

pub mod azure;
pub mod registry;
pub mod settings;

pub use azure::{AzureJob, AzureTarget};
pub use registry::{CallableRef, NamespaceInfo, NamespaceRegistry, Origin, Resolution};
pub use settings::ConfigValue;

/// Selects the client backend.
pub const CLIENT_ENV: &str = "QSHARP_CLIENT";
/// Selects an alternate named kernel.
pub const KERNEL_NAME_ENV: &str = "QSHARP_KERNEL_NAME";
/// Overrides the full kernel command line (whitespace separated).
pub const KERNEL_COMMAND_ENV: &str = "QSHARP_KERNEL_COMMAND";
/// Extra text appended to the user agent.
pub const USER_AGENT_EXTRA_ENV: &str = "QSHARP_USER_AGENT_EXTRA";
/// Older name of [`CLIENT_ENV`], read when it is unset.
pub const LEGACY_CLIENT_ENV: &str = "QSHARP_PY_CLIENT";
/// Older name of [`KERNEL_NAME_ENV`], read when it is unset.
pub const LEGACY_KERNEL_NAME_ENV: &str = "QSHARP_PY_IQSHARP_KERNEL_NAME";

/// Which kernel endpoint the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A kernel child process.
    #[default]
    Iqsharp,
    /// The in-process mock kernel.
    Mock,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Kernel backend (default: iqsharp)
    pub backend: Backend,

    /// Kernel executable name (default: iqsharp)
    pub kernel_name: String,

    /// Full kernel command line, overriding `kernel_name`
    pub kernel_command: Option<Vec<String>>,

    /// Working directory for the kernel process
    pub working_dir: Option<PathBuf>,

    /// Extra user-agent text
    pub user_agent_extra: Option<String>,

    /// Default dispatch timeout in seconds
    pub default_timeout_secs: u64,

    /// Readiness checks before giving up at startup
    pub readiness_attempts: u32,

    /// Delay between readiness checks in milliseconds
    pub readiness_delay_ms: u64,

    /// Timeout of a single readiness check in seconds
    pub readiness_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Iqsharp,
            kernel_name: "iqsharp".to_string(),
            kernel_command: None,
            working_dir: None,
            user_agent_extra: None,
            default_timeout_secs: 120,
            readiness_attempts: 20,
            readiness_delay_ms: 1000,
            readiness_timeout_secs: 6,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(backend) = lookup(CLIENT_ENV).or_else(|| lookup(LEGACY_CLIENT_ENV)) {
            match backend.trim().to_ascii_lowercase().as_str() {
                "iqsharp" => config.backend = Backend::Iqsharp,
                "mock" => config.backend = Backend::Mock,
                other => warn!(backend = other, "unknown {CLIENT_ENV}, using iqsharp"),
            }
        }
        let kernel_name = lookup(KERNEL_NAME_ENV).or_else(|| lookup(LEGACY_KERNEL_NAME_ENV));
        if let Some(name) = kernel_name.filter(|name| !name.trim().is_empty()) {
            config.kernel_name = name.trim().to_string();
        }
        if let Some(command) = lookup(KERNEL_COMMAND_ENV) {
            let parts: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
            if !parts.is_empty() {
                config.kernel_command = Some(parts);
            }
        }
        config.user_agent_extra = lookup(USER_AGENT_EXTRA_ENV).filter(|extra| !extra.is_empty());
        config
    }

    /// User agent reported to the kernel.
    pub fn user_agent(&self) -> String {
        match &self.user_agent_extra {
            Some(extra) => format!("{}/{} {extra}", crate::CLIENT_NAME, crate::VERSION),
            None => format!("{}/{}", crate::CLIENT_NAME, crate::VERSION),
        }
    }

    /// How to launch the kernel process.
    ///
    /// Without an explicit command the kernel executable is run with `--stdio`.
    pub fn kernel_spec(&self) -> TransportResult<KernelSpec> {
        let spec = match &self.kernel_command {
            Some(command) => KernelSpec::from_command(command.clone(), self.user_agent())?,
            None => KernelSpec::from_command(
                [self.kernel_name.clone(), "--stdio".to_string()],
                self.user_agent(),
            )?,
        };
        Ok(match &self.working_dir {
            Some(dir) => spec.in_dir(dir),
            None => spec,
        })
    }

    /// Default dispatch timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Explicit context object for one kernel session.
pub struct Client {
    config: ClientConfig,
    dispatcher: CommandDispatcher,
    registry: NamespaceRegistry,
}

impl Client {
    /// Build a client for the configured backend; the kernel is not started.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport: Box<dyn KernelTransport> = match config.backend {
            Backend::Iqsharp => Box::new(ProcessTransport::new(config.kernel_spec()?)?),
            Backend::Mock => Box::new(MockTransport::new()),
        };
        Ok(Self::with_transport(config, transport, Arc::new(LogSink)))
    }

    /// Build a client configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Build a client over an explicit transport and display sink.
    pub fn with_transport(
        config: ClientConfig,
        transport: Box<dyn KernelTransport>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(
            SessionTransport::new(transport),
            sink,
            config.default_timeout(),
        );
        Self {
            config,
            dispatcher,
            registry: NamespaceRegistry::new(),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session state (busy flag, liveness, installed hook).
    pub fn session(&self) -> &Arc<Session> {
        self.dispatcher.session()
    }

    /// Whether a command is in flight.
    pub fn busy(&self) -> bool {
        self.session().is_busy()
    }

    // Lifecycle

    /// Start the kernel and wait until it answers the readiness check.
    pub fn start(&self) -> Result<()> {
        info!(backend = ?self.config.backend, "starting Q# client");
        self.dispatcher.start()?;

        let attempts = self.config.readiness_attempts;
        let delay = Duration::from_millis(self.config.readiness_delay_ms);
        for attempt in 1..=attempts {
            if self.is_ready() {
                info!(attempt, "IQ# kernel is ready");
                return Ok(());
            }
            debug!(attempt, attempts, "IQ# kernel not ready yet");
            if attempt < attempts {
                std::thread::sleep(delay);
            }
        }
        Err(ClientError::TransportUnavailable { attempts })
    }

    /// Quiet `%version` check; `false` on any failure.
    pub fn is_ready(&self) -> bool {
        self.dispatcher
            .is_ready(Duration::from_secs(self.config.readiness_timeout_secs))
    }

    /// Stop the kernel. Idempotent.
    pub fn stop(&self) {
        self.dispatcher.stop();
    }

    // Dispatch

    /// Dispatch a command with explicit options.
    pub fn dispatch(&self, command: &Command, options: ExecuteOptions<'_>) -> Result<Outcome> {
        self.dispatcher.dispatch(command, options)
    }

    /// Run raw text through the kernel and return the decoded result.
    pub fn execute(&self, code: &str) -> Result<Value> {
        self.run(Command::raw(code), ExecuteOptions::default())
    }

    fn run(&self, command: Command, options: ExecuteOptions<'_>) -> Result<Value> {
        self.dispatcher
            .dispatch(&command, options)
            .map(Outcome::into_value)
    }

    fn run_typed<T: FromValue>(
        &self,
        command: Command,
        options: ExecuteOptions<'_>,
    ) -> Result<T> {
        let directive = command.text().to_string();
        self.dispatcher.dispatch(&command, options)?.extract(&directive)
    }

    /// Start capturing diagnostics; the previous hook returns when the guard drops.
    pub fn capture_diagnostics(&self, passthrough: bool) -> DiagnosticCapture {
        DiagnosticCapture::install(Arc::clone(self.session()), passthrough)
    }

    // Compilation and discovery

    /// Compile a Q# snippet, returning the callables it defined.
    pub fn compile(&self, source: &str) -> Result<Vec<CallableRef>> {
        let names: Option<Vec<String>> =
            self.run_typed(Command::raw(source), ExecuteOptions::default())?;
        let names = names.unwrap_or_default();
        self.registry
            .record_snippets(names.iter().map(String::as_str));
        Ok(names
            .into_iter()
            .map(|name| CallableRef::new(name, Origin::Snippet))
            .collect())
    }

    /// All callables the kernel can run (`%who`).
    pub fn available_operations(&self) -> Result<Vec<String>> {
        self.run_typed(
            Command::directive("who", None),
            ExecuteOptions::default().raise_on_stderr(false),
        )
    }

    /// Callables defined in the workspace (`%workspace`).
    pub fn workspace_operations(&self) -> Result<Vec<String>> {
        self.run_typed(Command::directive("workspace", None), ExecuteOptions::default())
    }

    /// Metadata for a callable (`?name`).
    pub fn operation_metadata(&self, name: &str) -> Result<Value> {
        self.run(Command::raw(format!("?{name}")), ExecuteOptions::default())
    }

    /// Reload the workspace and drop the namespace cache.
    pub fn reload(&self) -> Result<()> {
        self.registry.invalidate();
        self.run(
            Command::directive("workspace", Some("reload")),
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    /// Look up a namespace or callable by qualified name.
    pub fn resolve(&self, name: &str) -> Result<Resolution> {
        self.registry
            .resolve_with(name, || self.available_operations())
    }

    /// Available callables grouped by namespace.
    pub fn operations_by_namespace(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.registry
            .by_namespace_with(|| self.available_operations())
    }

    /// Namespace registry backing [`Client::resolve`].
    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    // Configuration

    /// Current kernel settings (`%config`).
    pub fn get_config(&self) -> Result<BTreeMap<String, Value>> {
        let table = self.run(Command::directive("config", None), ExecuteOptions::default())?;
        settings::parse_rows(&table)
    }

    /// Change one kernel setting.
    pub fn set_config(&self, name: &str, value: impl Into<ConfigValue>) -> Result<()> {
        self.run(
            settings::set_command(name, &value.into()),
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    /// Persist kernel settings to its working directory.
    pub fn save_config(&self) -> Result<()> {
        self.run(settings::save_command(), ExecuteOptions::default())?;
        Ok(())
    }

    // Packages and projects

    /// Load a package into the kernel.
    pub fn add_package(&self, name: &str) -> Result<Value> {
        self.registry.invalidate();
        self.run(
            Command::directive("package", Some(name)),
            ExecuteOptions::default(),
        )
    }

    /// Packages loaded into the kernel.
    pub fn packages(&self) -> Result<Vec<String>> {
        self.run_typed(
            Command::directive("package", None),
            ExecuteOptions::default().raise_on_stderr(false),
        )
    }

    /// Add a project reference to the workspace.
    pub fn add_project(&self, path: &str) -> Result<Value> {
        self.registry.invalidate();
        self.run(
            Command::directive("project", Some(path)),
            ExecuteOptions::default(),
        )
    }

    /// Project references of the workspace.
    pub fn projects(&self) -> Result<Vec<String>> {
        self.run_typed(
            Command::directive("project", None),
            ExecuteOptions::default().raise_on_stderr(false),
        )
    }

    // Execution targets

    /// Run on the full-state simulator.
    pub fn simulate(&self, op: &CallableRef, args: &Arguments) -> Result<Value> {
        self.run_callable("simulate", op, args, ExecuteOptions::default().timeout(Timeout::Unbounded))
    }

    /// Run on the sparse simulator.
    pub fn simulate_sparse(&self, op: &CallableRef, args: &Arguments) -> Result<Value> {
        self.run_callable(
            "simulate_sparse",
            op,
            args,
            ExecuteOptions::default().timeout(Timeout::Unbounded),
        )
    }

    /// Run on the Toffoli simulator.
    pub fn toffoli_simulate(&self, op: &CallableRef, args: &Arguments) -> Result<Value> {
        self.run_callable("toffoli", op, args, ExecuteOptions::default().timeout(Timeout::Unbounded))
    }

    /// Estimate resources, returning metric name to count.
    pub fn estimate(&self, op: &CallableRef, args: &Arguments) -> Result<BTreeMap<String, i64>> {
        let rows = self.run_callable(
            "estimate",
            op,
            args,
            ExecuteOptions::default().timeout(Timeout::Unbounded),
        )?;
        parse_estimates(&rows)
    }

    /// Gates and qubits used by the callable.
    pub fn trace(&self, op: &CallableRef, args: &Arguments) -> Result<Value> {
        self.run_callable("trace", op, args, ExecuteOptions::default().quiet())
    }

    /// Write QIR bitcode for an entry point to `output`.
    pub fn compile_to_qir(&self, op: &CallableRef, output: &Path) -> Result<()> {
        let args = Arguments::new().with("output", output.display().to_string());
        self.run_callable("qir", op, &args, ExecuteOptions::default())?;
        Ok(())
    }

    /// QIR bitcode for an entry point.
    pub fn qir_bitcode(&self, op: &CallableRef) -> Result<Vec<u8>> {
        let path = std::env::temp_dir().join(format!("qsharp-{}.bc", uuid::Uuid::new_v4()));
        self.compile_to_qir(op, &path)?;
        let bitcode = std::fs::read(&path)?;
        if let Err(err) = std::fs::remove_file(&path) {
            debug!(path = %path.display(), error = %err, "could not remove QIR scratch file");
        }
        Ok(bitcode)
    }

    fn run_callable(
        &self,
        directive: &str,
        op: &CallableRef,
        args: &Arguments,
        options: ExecuteOptions<'_>,
    ) -> Result<Value> {
        self.run(Command::callable(directive, op.name(), args), options)
    }

    // Versions

    /// Versions of the kernel's components.
    pub fn component_versions(&self, timeout: Timeout) -> Result<BTreeMap<String, String>> {
        let mut versions = BTreeMap::new();
        let options = ExecuteOptions::default()
            .quiet()
            .raise_on_stderr(false)
            .timeout(timeout)
            .on_display(|data| match data.decode() {
                Ok(Some(table)) => collect_versions(&table, &mut versions),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "unreadable version table"),
            });
        self.dispatcher
            .dispatch(&Command::directive("version", None), options)?;
        Ok(versions)
    }

    // Experimental noise model

    /// Run on the open-systems simulator.
    pub fn simulate_noise(&self, op: &CallableRef, args: &Arguments) -> Result<Value> {
        self.run_callable(
            "experimental.simulate_noise",
            op,
            args,
            ExecuteOptions::default().timeout(Timeout::Unbounded),
        )
    }

    /// Current noise model.
    pub fn noise_model(&self) -> Result<Value> {
        self.run(
            Command::directive("experimental.noise_model", None),
            ExecuteOptions::default(),
        )
    }

    /// A named built-in noise model.
    pub fn noise_model_by_name(&self, name: &str) -> Result<Value> {
        self.run(
            Command::directive("experimental.noise_model", Some(&format!("--get-by-name {name}"))),
            ExecuteOptions::default(),
        )
    }

    /// Replace the noise model.
    pub fn set_noise_model(&self, model: &Value) -> Result<()> {
        let json = codec::encode(model).to_string();
        self.run(
            Command::directive("experimental.noise_model", Some(&json)),
            ExecuteOptions::default(),
        )?;
        Ok(())
    }

    /// Replace the noise model with a named built-in one.
    pub fn set_noise_model_by_name(&self, name: &str) -> Result<()> {
        self.run(
            Command::directive("experimental.noise_model", Some(&format!("--load-by-name {name}"))),
            ExecuteOptions::default(),
        )?;
        Ok(())
    }
}

fn collect_versions(table: &Value, versions: &mut BTreeMap<String, String>) {
    let Some(rows) = table.get("rows").and_then(Value::as_slice) else {
        return;
    };
    for row in rows {
        if let Some([component, version]) = row.as_slice() {
            if let (Some(component), Some(version)) = (component.as_str(), version.as_str()) {
                versions.insert(component.to_string(), version.to_string());
            }
        }
    }
}

fn parse_estimates(rows: &Value) -> Result<BTreeMap<String, i64>> {
    let unexpected = |detail: String| ClientError::UnexpectedResult {
        directive: "%estimate".to_string(),
        detail,
    };
    let rows = rows
        .as_slice()
        .ok_or_else(|| unexpected(format!("expected rows, found {rows:?}")))?;

    rows.iter()
        .map(|row| {
            let metric = row
                .get("Metric")
                .and_then(Value::as_str)
                .ok_or_else(|| unexpected(format!("row without Metric: {row:?}")))?;
            let sum = row.get("Sum").unwrap_or(&Value::Null);
            let count = match sum {
                Value::String(text) => text.trim().parse::<f64>().ok(),
                other => other.as_f64(),
            }
            .ok_or_else(|| unexpected(format!("{metric} has no numeric Sum")))?;
            Ok((metric.to_string(), count as i64))
        })
        .collect()
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_str;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_secs(120));
        assert_eq!(config.readiness_attempts, 20);
        let spec = config.kernel_spec().unwrap();
        assert_eq!(spec.program, "iqsharp");
        assert_eq!(spec.args, vec!["--stdio".to_string()]);
        assert!(spec.user_agent.starts_with("iqsharp-client/"));
    }

    #[test]
    fn config_from_environment() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("QSHARP_CLIENT", "Mock"),
            ("QSHARP_KERNEL_NAME", "iqsharp-next"),
            ("QSHARP_USER_AGENT_EXTRA", "(ci)"),
        ]));
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.kernel_name, "iqsharp-next");
        assert!(config.user_agent().ends_with(" (ci)"));

        let config = ClientConfig::from_lookup(lookup(&[(
            "QSHARP_KERNEL_COMMAND",
            "dotnet iqsharp.dll --stdio",
        )]));
        let spec = config.kernel_spec().unwrap();
        assert_eq!(spec.program, "dotnet");
        assert_eq!(spec.args, vec!["iqsharp.dll", "--stdio"]);
    }

    #[test]
    fn legacy_variable_names_are_fallbacks() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("QSHARP_PY_CLIENT", "mock"),
            ("QSHARP_PY_IQSHARP_KERNEL_NAME", "iqsharp-legacy"),
        ]));
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.kernel_name, "iqsharp-legacy");

        let config = ClientConfig::from_lookup(lookup(&[
            ("QSHARP_CLIENT", "iqsharp"),
            ("QSHARP_PY_CLIENT", "mock"),
            ("QSHARP_KERNEL_NAME", "iqsharp-next"),
            ("QSHARP_PY_IQSHARP_KERNEL_NAME", "iqsharp-legacy"),
        ]));
        assert_eq!(config.backend, Backend::Iqsharp);
        assert_eq!(config.kernel_name, "iqsharp-next");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"backend": "mock", "readiness_attempts": 3}"#).unwrap();
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.readiness_attempts, 3);
        assert_eq!(config.kernel_name, "iqsharp");
    }

    #[test]
    fn estimates_become_integers() {
        let rows = decode_str(
            r#"[{"Metric": "Depth", "Sum": 13.0}, {"Metric": "Width", "Sum": "15"}]"#,
        )
        .unwrap();
        let counts = parse_estimates(&rows).unwrap();
        assert_eq!(counts["Depth"], 13);
        assert_eq!(counts["Width"], 15);
    }

    #[test]
    fn version_rows_accept_lists_and_tuples() {
        let table = decode_str(
            r#"{"rows": [["iqsharp", "0.28.1"], {"@type": "tuple", "Item1": "Jupyter Core", "Item2": "1.5"}]}"#,
        )
        .unwrap();
        let mut versions = BTreeMap::new();
        collect_versions(&table, &mut versions);
        assert_eq!(versions["iqsharp"], "0.28.1");
        assert_eq!(versions["Jupyter Core"], "1.5");
    }
}
