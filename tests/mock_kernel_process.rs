//! End-to-end tests that drive the `mock-kernel` binary over stdio.

use iqsharp_client::client::{ClientConfig, Resolution};
use iqsharp_client::error::TransportError;
use iqsharp_client::{Arguments, Client, ClientError, Command, ExecuteOptions, Timeout, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn kernel_config(dir: &Path) -> ClientConfig {
    ClientConfig {
        kernel_command: Some(vec![
            env!("CARGO_BIN_EXE_mock-kernel").to_string(),
            "--stdio".to_string(),
        ]),
        working_dir: Some(dir.to_path_buf()),
        user_agent_extra: Some("(integration)".to_string()),
        readiness_attempts: 10,
        readiness_delay_ms: 100,
        readiness_timeout_secs: 10,
        default_timeout_secs: 30,
        ..ClientConfig::default()
    }
}

fn started_client(dir: &Path) -> Client {
    let client = Client::new(kernel_config(dir)).expect("client");
    client.start().expect("mock kernel should become ready");
    client
}

#[test]
fn kernel_answers_discovery_directives() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    assert_eq!(
        client.available_operations().expect("who"),
        vec!["A.B.C", "A.B.D", "A.E.F"]
    );
    match client.resolve("A.B").expect("resolve") {
        Resolution::Namespace(info) => assert_eq!(info.callables, vec!["C", "D"]),
        other => panic!("expected namespace, got {other:?}"),
    }
    client.stop();
}

#[test]
fn versions_include_user_agent() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    let versions = client
        .component_versions(Timeout::Default)
        .expect("versions");
    assert!(versions.contains_key("iqsharp"));
    let agent = versions.get("User agent").expect("user agent row");
    assert!(agent.starts_with("iqsharp-client/"), "agent: {agent}");
    assert!(agent.ends_with("(integration)"), "agent: {agent}");
}

#[test]
fn settings_round_trip_and_save() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    client
        .set_config("dump.truncateSmallAmplitudes", true)
        .expect("set bool");
    client
        .set_config("dump.truncationThreshold", 0.1)
        .expect("set number");
    client
        .set_config("dump.basisStateLabelingConvention", "Bitstring")
        .expect("set string");

    let settings = client.get_config().expect("config");
    assert_eq!(settings["dump.truncateSmallAmplitudes"], Value::Bool(true));
    assert_eq!(settings["dump.truncationThreshold"], Value::Float(0.1));
    assert_eq!(
        settings["dump.basisStateLabelingConvention"],
        Value::from("Bitstring")
    );

    client.save_config().expect("save");
    let saved = std::fs::read_to_string(temp.path().join(".iqsharp-config.json"))
        .expect("settings file written to the kernel directory");
    let saved: serde_json::Value = serde_json::from_str(&saved).expect("settings JSON");
    assert_eq!(saved["dump.basisStateLabelingConvention"], "Bitstring");
    assert_eq!(saved["dump.truncateSmallAmplitudes"], true);
}

#[test]
fn unknown_directive_raises_kernel_error() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    match client.execute("%bogus") {
        Err(ClientError::Kernel(err)) => {
            assert!(err.lines[0].contains("No such magic command"), "{err}")
        }
        other => panic!("expected kernel error, got {other:?}"),
    }
    assert!(!client.busy());
    assert!(client.is_ready(), "kernel keeps serving after an error");
}

#[test]
fn compiled_snippet_runs_in_kernel_process() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    let ops = client
        .compile("operation Hello() : Unit { }")
        .expect("compile");
    assert_eq!(ops[0].name(), "Workspace.Snippet.Hello");
    assert_eq!(
        client.simulate(&ops[0], &Arguments::new()).expect("simulate"),
        Value::Tuple(Vec::new())
    );
}

#[test]
fn timed_out_reply_does_not_leak_into_next_command() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    let slow = client.dispatch(
        &Command::raw("%sleep 1500"),
        ExecuteOptions::default().timeout(Timeout::After(Duration::from_millis(200))),
    );
    match slow {
        Err(ClientError::Transport(TransportError::Timeout(limit))) => {
            assert_eq!(limit, Duration::from_millis(200))
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!client.busy());

    // the late `%sleep` result arrives first and must be dropped
    assert_eq!(
        client.available_operations().expect("who after timeout"),
        vec!["A.B.C", "A.B.D", "A.E.F"]
    );
    assert!(client.session().is_live());
}

#[test]
fn stopped_kernel_restarts_on_next_command() {
    let temp = TempDir::new().expect("tempdir");
    let client = started_client(temp.path());

    client.stop();
    client.stop();
    assert!(!client.session().is_live());

    // a fresh process has no snippets
    assert_eq!(client.available_operations().expect("who").len(), 3);
    assert!(client.session().is_live());
    client.stop();
}

#[test]
fn missing_kernel_executable_fails_to_start() {
    let temp = TempDir::new().expect("tempdir");
    let config = ClientConfig {
        kernel_command: Some(vec![
            temp.path().join("no-such-kernel").display().to_string(),
        ]),
        ..ClientConfig::default()
    };
    let client = Client::new(config).expect("client");

    match client.start() {
        Err(ClientError::Transport(TransportError::Spawn { program, .. })) => {
            assert!(program.ends_with("no-such-kernel"))
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn kernel_that_exits_is_reported_unavailable() {
    let temp = TempDir::new().expect("tempdir");
    let config = ClientConfig {
        kernel_command: Some(vec!["true".to_string()]),
        working_dir: Some(temp.path().to_path_buf()),
        readiness_attempts: 2,
        readiness_delay_ms: 10,
        readiness_timeout_secs: 2,
        ..ClientConfig::default()
    };
    let client = Client::new(config).expect("client");

    match client.start() {
        Err(ClientError::TransportUnavailable { attempts }) => assert_eq!(attempts, 2),
        other => panic!("expected unavailable, got {other:?}"),
    }
}
