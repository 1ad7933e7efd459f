//! In-process kernel emulator.
//!
//! [`MockKernel`] answers the same directives as the real kernel with canned
//! data. It backs [`MockTransport`] (selected with `QSHARP_CLIENT=mock`) and
//! the `mock-kernel` binary, which serves it over the NDJSON stdio protocol.

use serde_json::{Map, Value as Json, json};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::settings::SETTINGS_FILE;
use crate::error::TransportResult;
use crate::protocol::{
    Command, DisplayData, EXECUTE_REPLY, KernelFrame, ReplyMessage, RequestFrame, StreamName,
};
use crate::transport::KernelTransport;

mod azure;

use azure::MockWorkspace;

const BUILTIN_CALLABLES: [&str; 3] = ["A.B.C", "A.B.D", "A.E.F"];
const SNIPPET_NAMESPACE: &str = "Workspace.Snippet";
const NOISE_MODEL_NAMES: [&str; 2] = ["ideal", "ideal_stabilizer"];

/// Kernel emulator with in-memory state.
#[derive(Debug, Clone)]
pub struct MockKernel {
    working_dir: PathBuf,
    user_agent: Option<String>,
    snippets: Vec<String>,
    packages: Vec<String>,
    projects: Vec<String>,
    settings: BTreeMap<String, Json>,
    noise_model: Json,
    workspace: MockWorkspace,
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKernel {
    /// Kernel working in the current directory.
    pub fn new() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            user_agent: None,
            snippets: Vec::new(),
            packages: Vec::new(),
            projects: Vec::new(),
            settings: BTreeMap::new(),
            noise_model: noise_model_named("ideal"),
            workspace: MockWorkspace::default(),
        }
    }

    /// Write settings files into `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Report `agent` as the client user agent in `%version`.
    pub fn with_user_agent(mut self, agent: Option<String>) -> Self {
        self.user_agent = agent;
        self
    }

    /// Execute one command, returning its reply messages in order.
    pub fn handle(&mut self, code: &str) -> Vec<ReplyMessage> {
        let code = code.trim();
        debug!(code, "mock kernel executing");

        if let Some(name) = code.strip_prefix('?') {
            return self.metadata(name.trim());
        }
        let Some(directive) = code.strip_prefix('%') else {
            return self.compile(code);
        };

        let (name, rest) = directive
            .split_once(char::is_whitespace)
            .map_or((directive, ""), |(name, rest)| (name, rest.trim()));
        match name {
            "version" => vec![self.version_table()],
            "who" => vec![result(&json!(self.callables()))],
            "workspace" => match rest {
                "" => vec![result(&json!([]))],
                "reload" => Vec::new(),
                other => vec![stderr(&format!("Unknown workspace command: {other}"))],
            },
            "config" => self.config(rest),
            "package" => {
                if !rest.is_empty() {
                    self.packages.push(rest.to_string());
                }
                vec![result(&json!(self.packages))]
            }
            "project" => {
                if !rest.is_empty() {
                    self.projects.push(rest.to_string());
                }
                vec![result(&json!(self.projects))]
            }
            "simulate" | "simulate_sparse" | "toffoli" | "experimental.simulate_noise" => {
                self.run_callable(rest, |_, _| vec![result(&json!({"@type": "tuple"}))])
            }
            "estimate" => self.run_callable(rest, |_, _| {
                vec![result(&json!([
                    {"Metric": "Depth", "Sum": 13.0},
                    {"Metric": "Width", "Sum": 15.0}
                ]))]
            }),
            "trace" => self.run_callable(rest, |callable, _| {
                vec![ReplyMessage::ExecutionPath(json!({
                    "qubits": [{"id": 0}],
                    "operations": [{"gate": callable}]
                }))]
            }),
            "qir" => self.run_callable(rest, |_, args| qir(args)),
            "experimental.noise_model" => self.noise_model(rest),
            "sleep" => match rest.parse::<u64>() {
                Ok(millis) => {
                    std::thread::sleep(Duration::from_millis(millis));
                    vec![result(&json!({"slept_ms": millis}))]
                }
                Err(_) => vec![stderr(&format!("Invalid duration: {rest}\n"))],
            },
            other => match other.strip_prefix("azure.") {
                Some(command) => {
                    let callables = self.callables();
                    self.workspace.handle(command, rest, &callables)
                }
                None => vec![stderr(&format!("No such magic command: %{other}\n"))],
            },
        }
    }

    fn callables(&self) -> Vec<String> {
        BUILTIN_CALLABLES
            .iter()
            .map(|name| name.to_string())
            .chain(self.snippets.iter().cloned())
            .collect()
    }

    fn is_known(&self, name: &str) -> bool {
        BUILTIN_CALLABLES.contains(&name) || self.snippets.iter().any(|known| known == name)
    }

    fn compile(&mut self, source: &str) -> Vec<ReplyMessage> {
        if source.matches('{').count() != source.matches('}').count() {
            return vec![stderr("QS3001: unbalanced braces in snippet\n")];
        }

        let tokens: Vec<&str> = source
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .collect();
        let mut declared = Vec::new();
        for pair in tokens.windows(2) {
            if matches!(pair[0], "operation" | "function") {
                let qualified = format!("{SNIPPET_NAMESPACE}.{}", pair[1]);
                if !self.snippets.contains(&qualified) {
                    self.snippets.push(qualified.clone());
                }
                declared.push(qualified);
            }
        }

        let mut replies = Vec::new();
        if source.contains("DumpMachine") {
            let state = json!({
                "n_qubits": 1,
                "amplitudes": {"v": 1, "dim": [2], "dtype": "complex128", "data": [[1.0, 0.0], [0.0, 0.0]]}
            });
            replies.push(ReplyMessage::Display(
                DisplayData::qsharp(&state).with_text("|0⟩  1 + 0i"),
            ));
        }
        replies.push(result(&json!(declared)));
        replies
    }

    fn metadata(&self, name: &str) -> Vec<ReplyMessage> {
        if !self.is_known(name) {
            return vec![stderr(&format!("No such callable: {name}\n"))];
        }
        let source = if name.starts_with(SNIPPET_NAMESPACE) {
            "snippets"
        } else {
            "workspace"
        };
        vec![result(&json!({"name": name, "kind": "operation", "source": source}))]
    }

    fn version_table(&self) -> ReplyMessage {
        let mut rows = vec![
            json!(["iqsharp", crate::VERSION]),
            json!(["Jupyter Core", crate::VERSION]),
        ];
        if let Some(agent) = &self.user_agent {
            rows.push(json!(["User agent", agent]));
        }
        let text = rows
            .iter()
            .map(|row| {
                format!(
                    "{} {}",
                    row[0].as_str().unwrap_or_default(),
                    row[1].as_str().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        ReplyMessage::Display(DisplayData::qsharp(&json!({"rows": rows})).with_text(text))
    }

    fn config(&mut self, rest: &str) -> Vec<ReplyMessage> {
        if rest.is_empty() {
            let rows: Vec<Json> = self
                .settings
                .iter()
                .map(|(key, value)| json!({"Key": key, "Value": value}))
                .collect();
            return vec![result(&json!({"rows": rows}))];
        }
        if rest == "--save" {
            return match self.save_settings() {
                Ok(()) => Vec::new(),
                Err(err) => vec![stderr(&format!("Could not save settings: {err}\n"))],
            };
        }

        let Some((key, raw)) = rest.split_once('=') else {
            return vec![stderr(&format!("Invalid configuration option: {rest}\n"))];
        };
        let value = match raw.trim() {
            "true" => json!(true),
            "false" => json!(false),
            quoted if quoted.len() >= 2 && quoted.starts_with('\'') && quoted.ends_with('\'') => {
                Json::String(quoted[1..quoted.len() - 1].to_string())
            }
            number => match number.parse::<f64>() {
                Ok(num) => json!(num),
                Err(_) => return vec![stderr(&format!("Invalid value for {key}: {number}\n"))],
            },
        };
        self.settings.insert(key.trim().to_string(), value);
        Vec::new()
    }

    fn save_settings(&self) -> io::Result<()> {
        let settings: Map<String, Json> = self
            .settings
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let text = serde_json::to_string_pretty(&settings)?;
        std::fs::write(self.working_dir.join(SETTINGS_FILE), text)
    }

    fn run_callable<F>(&self, rest: &str, run: F) -> Vec<ReplyMessage>
    where
        F: FnOnce(&str, &Json) -> Vec<ReplyMessage>,
    {
        let (callable, raw_args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(callable, args)| (callable, args.trim()));
        if !self.is_known(callable) {
            return vec![stderr(&format!("No such callable: {callable}\n"))];
        }
        let args = if raw_args.is_empty() {
            json!({})
        } else {
            match serde_json::from_str(raw_args) {
                Ok(args) => args,
                Err(err) => return vec![stderr(&format!("Invalid arguments: {err}\n"))],
            }
        };
        run(callable, &args)
    }

    fn noise_model(&mut self, rest: &str) -> Vec<ReplyMessage> {
        if rest.is_empty() {
            return vec![result(&self.noise_model)];
        }
        if let Some(name) = rest.strip_prefix("--get-by-name") {
            return match known_model(name.trim()) {
                Some(name) => vec![result(&noise_model_named(name))],
                None => vec![stderr(&format!("No noise model named {}\n", name.trim()))],
            };
        }
        if let Some(name) = rest.strip_prefix("--load-by-name") {
            return match known_model(name.trim()) {
                Some(name) => {
                    self.noise_model = noise_model_named(name);
                    Vec::new()
                }
                None => vec![stderr(&format!("No noise model named {}\n", name.trim()))],
            };
        }
        match serde_json::from_str(rest) {
            Ok(model) => {
                self.noise_model = model;
                Vec::new()
            }
            Err(err) => vec![stderr(&format!("Invalid noise model: {err}\n"))],
        }
    }

    /// Serve the NDJSON protocol until EOF or a shutdown request.
    pub fn serve<R: BufRead, W: Write>(&mut self, reader: R, mut writer: W) -> io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let request: RequestFrame = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "ignoring malformed request");
                    continue;
                }
            };
            let parent = request.msg_id().to_string();

            match request.header.msg_type.as_str() {
                "shutdown_request" => {
                    write_frame(
                        &mut writer,
                        &KernelFrame::new(&parent, "shutdown_reply", json!({"restart": false})),
                    )?;
                    return Ok(());
                }
                "execute_request" => {
                    let replies = self.handle(request.code().unwrap_or_default());
                    let failed = replies.iter().any(|reply| {
                        matches!(reply, ReplyMessage::Stream { name: StreamName::Stderr, .. })
                    });
                    for reply in &replies {
                        write_frame(&mut writer, &reply.to_frame(&parent))?;
                    }
                    let status = if failed { "error" } else { "ok" };
                    write_frame(
                        &mut writer,
                        &KernelFrame::new(&parent, EXECUTE_REPLY, json!({"status": status})),
                    )?;
                }
                other => debug!(msg_type = other, "ignoring request"),
            }
        }
        Ok(())
    }
}

fn write_frame<W: Write>(writer: &mut W, frame: &KernelFrame) -> io::Result<()> {
    let mut payload = serde_json::to_vec(frame)?;
    payload.push(b'\n');
    writer.write_all(&payload)?;
    writer.flush()
}

fn result(payload: &Json) -> ReplyMessage {
    ReplyMessage::ExecuteResult(DisplayData::qsharp(payload).with_text(payload.to_string()))
}

fn stderr(text: &str) -> ReplyMessage {
    ReplyMessage::Stream {
        name: StreamName::Stderr,
        text: text.to_string(),
    }
}

fn qir(args: &Json) -> Vec<ReplyMessage> {
    let Some(output) = args.get("output").and_then(Json::as_str) else {
        return vec![stderr("%qir requires an output path\n")];
    };
    // LLVM bitcode wrapper magic, enough for callers checking the header.
    match std::fs::write(output, [0x42, 0x43, 0xC0, 0xDE]) {
        Ok(()) => Vec::new(),
        Err(err) => vec![stderr(&format!("Could not write {output}: {err}\n"))],
    }
}

fn known_model(name: &str) -> Option<&'static str> {
    NOISE_MODEL_NAMES.into_iter().find(|known| *known == name)
}

fn noise_model_named(name: &str) -> Json {
    let identity = json!({"v": 1, "dim": [2, 2], "data": [[1.0, 0.0], [0.0, 0.0], [0.0, 0.0], [1.0, 0.0]]});
    json!({
        "name": name,
        "initial_state": {"Mixed": {"v": 1, "dim": [2, 2], "data": [[1.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]}},
        "i": {"Unitary": identity},
    })
}

/// Kernel transport backed by an in-process [`MockKernel`].
#[derive(Debug, Default)]
pub struct MockTransport {
    kernel: MockKernel,
    running: bool,
}

impl MockTransport {
    /// Transport over a fresh mock kernel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport over a prepared mock kernel.
    pub fn with_kernel(kernel: MockKernel) -> Self {
        Self {
            kernel,
            running: false,
        }
    }
}

impl KernelTransport for MockTransport {
    fn start(&mut self) -> TransportResult<()> {
        debug!("mock kernel started");
        self.running = true;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.running
    }

    fn execute(
        &mut self,
        command: &Command,
        _timeout: Option<Duration>,
        sink: &mut dyn FnMut(ReplyMessage),
    ) -> TransportResult<()> {
        for reply in self.kernel.handle(command.text()) {
            sink(reply);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> TransportResult<()> {
        debug!("mock kernel stopped");
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(replies: &[ReplyMessage]) -> Option<Json> {
        replies.iter().find_map(|reply| match reply {
            ReplyMessage::ExecuteResult(data) => data.structured().ok().flatten(),
            _ => None,
        })
    }

    #[test]
    fn who_lists_builtin_and_compiled_callables() {
        let mut kernel = MockKernel::new();
        let compiled = kernel.handle("operation Hello() : Unit { }");
        assert_eq!(terminal(&compiled), Some(json!(["Workspace.Snippet.Hello"])));
        assert_eq!(
            terminal(&kernel.handle("%who")),
            Some(json!(["A.B.C", "A.B.D", "A.E.F", "Workspace.Snippet.Hello"]))
        );
    }

    #[test]
    fn unknown_directive_reports_on_stderr() {
        let replies = MockKernel::new().handle("%bogus");
        assert!(matches!(
            replies.as_slice(),
            [ReplyMessage::Stream { name: StreamName::Stderr, .. }]
        ));
    }

    #[test]
    fn config_set_and_list() {
        let mut kernel = MockKernel::new();
        assert!(kernel.handle("%config a=true").is_empty());
        assert!(kernel.handle("%config b='x y'").is_empty());
        assert!(kernel.handle("%config c=0.5").is_empty());
        assert_eq!(
            terminal(&kernel.handle("%config")),
            Some(json!({"rows": [
                {"Key": "a", "Value": true},
                {"Key": "b", "Value": "x y"},
                {"Key": "c", "Value": 0.5}
            ]}))
        );
    }

    #[test]
    fn serve_answers_and_terminates_each_request() {
        let request = RequestFrame::execute("s", "ua", &Command::raw("%who"));
        let shutdown = RequestFrame::shutdown("s", "ua");
        let input = format!(
            "{}\n{}\n",
            serde_json::to_string(&request).unwrap(),
            serde_json::to_string(&shutdown).unwrap()
        );
        let mut output = Vec::new();
        MockKernel::new()
            .serve(input.as_bytes(), &mut output)
            .unwrap();

        let frames: Vec<KernelFrame> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].msg_type, "execute_result");
        assert!(frames[1].is_reply());
        assert_eq!(frames[1].parent_header.msg_id, request.msg_id());
        assert_eq!(frames[2].msg_type, "shutdown_reply");
    }
}
