//! Client operations against the in-process mock kernel.

use iqsharp_client::client::{Backend, Origin, Resolution};
use iqsharp_client::{Arguments, CallableRef, Client, ClientConfig, ClientError, Value};

fn mock_client() -> Client {
    let config = ClientConfig {
        backend: Backend::Mock,
        readiness_attempts: 2,
        readiness_delay_ms: 0,
        ..ClientConfig::default()
    };
    let client = Client::new(config).expect("mock client");
    client.start().expect("mock kernel starts");
    client
}

fn op(name: &str) -> CallableRef {
    CallableRef::new(name, Origin::Workspace)
}

#[test]
fn namespaces_resolve_from_listing() {
    let client = mock_client();

    match client.resolve("A").expect("resolve") {
        Resolution::Namespace(info) => assert_eq!(info.children, vec!["B", "E"]),
        other => panic!("expected namespace, got {other:?}"),
    }
    assert_eq!(client.resolve("A.X").expect("resolve"), Resolution::NotFound);
    assert!(client.registry().is_cached());

    let grouped = client.operations_by_namespace().expect("grouped");
    assert_eq!(grouped["A.B"], vec!["C", "D"]);
    assert_eq!(grouped["A.E"], vec!["F"]);
}

#[test]
fn compile_then_simulate_snippet() {
    let client = mock_client();
    client.resolve("A").expect("prime cache");

    let ops = client
        .compile("operation Hello() : Unit { Message(\"hi\"); }")
        .expect("compile");
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].short_name(), "Hello");
    assert_eq!(ops[0].origin(), Origin::Snippet);
    assert!(!client.registry().is_cached(), "compilation drops the cache");

    let unit = client.simulate(&ops[0], &Arguments::new()).expect("simulate");
    assert_eq!(unit, Value::Tuple(Vec::new()));
    assert_eq!(
        client.toffoli_simulate(&ops[0], &Arguments::new()).expect("toffoli"),
        Value::Tuple(Vec::new())
    );

    match client.resolve("Workspace.Snippet") {
        Ok(Resolution::Namespace(info)) => assert_eq!(info.callables, vec!["Hello"]),
        other => panic!("expected snippet namespace, got {other:?}"),
    }
}

#[test]
fn compile_errors_surface_as_kernel_errors() {
    let client = mock_client();
    match client.compile("operation Broken() : Unit {") {
        Err(ClientError::Kernel(err)) => assert!(err.lines[0].starts_with("QS3001")),
        other => panic!("expected kernel error, got {other:?}"),
    }
}

#[test]
fn estimate_returns_integer_counts() {
    let client = mock_client();
    let counts = client.estimate(&op("A.B.C"), &Arguments::new()).expect("estimate");
    assert_eq!(counts["Depth"], 13);
    assert_eq!(counts["Width"], 15);
}

#[test]
fn trace_returns_execution_path() {
    let client = mock_client();
    let path = client.trace(&op("A.B.C"), &Arguments::new()).expect("trace");
    let operations = path.get("operations").and_then(Value::as_slice).expect("operations");
    assert_eq!(operations[0].get("gate").and_then(Value::as_str), Some("A.B.C"));
}

#[test]
fn qir_bitcode_has_wrapper_magic() {
    let client = mock_client();
    let bitcode = client.qir_bitcode(&op("A.B.C")).expect("qir");
    assert_eq!(bitcode, vec![0x42, 0x43, 0xC0, 0xDE]);
}

#[test]
fn unknown_callable_is_reported() {
    let client = mock_client();
    match client.simulate(&op("A.B.Missing"), &Arguments::new()) {
        Err(ClientError::Kernel(err)) => assert!(err.to_string().contains("A.B.Missing")),
        other => panic!("expected kernel error, got {other:?}"),
    }
}

#[test]
fn packages_and_projects_accumulate() {
    let client = mock_client();
    client.add_package("Microsoft.Quantum.Numerics").expect("add package");
    assert_eq!(client.packages().expect("packages"), vec!["Microsoft.Quantum.Numerics"]);

    client.add_project("../Lib/Lib.csproj").expect("add project");
    assert_eq!(client.projects().expect("projects"), vec!["../Lib/Lib.csproj"]);
}

#[test]
fn metadata_reports_source() {
    let client = mock_client();
    let meta = client.operation_metadata("A.E.F").expect("metadata");
    assert_eq!(meta.get("source").and_then(Value::as_str), Some("workspace"));
}

#[test]
fn reload_drops_registry_cache() {
    let client = mock_client();
    client.resolve("A").expect("resolve");
    assert!(client.registry().is_cached());

    client.reload().expect("reload");
    assert!(!client.registry().is_cached());
    assert!(client.workspace_operations().expect("workspace").is_empty());
}

#[test]
fn noise_models_by_name() {
    let client = mock_client();
    let current = client.noise_model().expect("noise model");
    assert_eq!(current.get("name").and_then(Value::as_str), Some("ideal"));

    client
        .set_noise_model_by_name("ideal_stabilizer")
        .expect("load by name");
    let current = client.noise_model().expect("noise model");
    assert_eq!(current.get("name").and_then(Value::as_str), Some("ideal_stabilizer"));

    assert!(matches!(
        client.noise_model_by_name("nonexistent"),
        Err(ClientError::Kernel(_))
    ));

    let custom = Value::Map([("name".to_string(), Value::from("custom"))].into());
    client.set_noise_model(&custom).expect("set model");
    assert_eq!(client.noise_model().expect("noise model"), custom);
    client
        .simulate_noise(&op("A.B.C"), &Arguments::new())
        .expect("simulate noise");
}

#[test]
fn dump_machine_diagnostics_are_captured() {
    let client = mock_client();
    let capture = client.capture_diagnostics(false);
    client
        .compile("operation Dump() : Unit { DumpMachine(); }")
        .expect("compile");
    let captured = capture.finish();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].get("n_qubits"), Some(&Value::Int(1)));
}

fn azure_error_name<T: std::fmt::Debug>(outcome: iqsharp_client::Result<T>) -> String {
    match outcome {
        Err(ClientError::Azure(err)) => err.error_name,
        other => panic!("expected azure error, got {other:?}"),
    }
}

fn connect_params(workspace: &str) -> Arguments {
    Arguments::new()
        .with("subscription", "test")
        .with("resourceGroup", "test")
        .with("workspace", workspace)
        .with("location", "test")
}

#[test]
fn azure_empty_workspace() {
    let client = mock_client();
    let none = Arguments::new();

    assert_eq!(azure_error_name(client.azure_target("", &none)), "NotConnected");
    assert!(client.azure_connect(&connect_params("test")).expect("connect").is_empty());
    assert_eq!(
        azure_error_name(client.azure_target("invalid.target", &none)),
        "InvalidTarget"
    );
    assert!(client.azure_jobs("", &none).expect("jobs").is_empty());
}

#[test]
fn azure_connect_requires_location() {
    let client = mock_client();
    let params = Arguments::new().with("workspace", "test");
    assert_eq!(azure_error_name(client.azure_connect(&params)), "NoWorkspaceLocation");
}

#[test]
fn azure_submit_and_track_jobs() {
    let client = mock_client();
    let none = Arguments::new();

    let targets = client
        .azure_connect(&connect_params("WorkspaceNameWithMockProviders"))
        .expect("connect");
    assert!(!targets.is_empty());
    assert_eq!(azure_error_name(client.azure_target("", &none)), "NoTarget");

    for target in client.azure_connect(&none).expect("current connection") {
        assert_eq!(client.azure_target(&target.id, &none).expect("set target"), target);
    }

    let op = client
        .compile("operation HelloQ() : Result { return Zero; }")
        .expect("compile")
        .remove(0);
    let job = client.azure_submit(&op, &none).expect("submit");
    assert_eq!(job.name, "Workspace.Snippet.HelloQ");
    assert!(!job.is_finished());
    assert_eq!(client.azure_status(&job.id, &none).expect("status").id, job.id);
    assert_eq!(azure_error_name(client.azure_output(&job.id, &none)), "JobNotCompleted");

    let histogram = client
        .azure_execute(&op, &Arguments::new().with("count", 3_i64).with("name", "test"))
        .expect("execute");
    assert_eq!(histogram.get("shots"), Some(&Value::Int(3)));
    assert_eq!(client.azure_output("", &none).expect("latest output"), histogram);

    let jobs = client.azure_jobs("", &none).expect("jobs");
    assert_eq!(jobs.len(), 2);
    assert_eq!(client.azure_jobs(&jobs[0].id, &none).expect("filtered").len(), 1);
    assert_eq!(
        client
            .azure_jobs("", &Arguments::new().with("count", 1_i64))
            .expect("counted")
            .len(),
        1
    );
    assert!(client
        .azure_jobs("invalid", &Arguments::new().with("count", 10_i64))
        .expect("no match")
        .is_empty());
    assert_eq!(azure_error_name(client.azure_status("missing", &none)), "JobNotFound");
}

#[test]
fn azure_rejects_unknown_entry_point() {
    let client = mock_client();
    let none = Arguments::new();
    client
        .azure_connect(&connect_params("WorkspaceNameWithMockProviders"))
        .expect("connect");
    client.azure_target("ionq.simulator", &none).expect("target");

    let err = client.azure_submit(&op("Missing.Op"), &none).unwrap_err();
    match err {
        ClientError::Azure(err) => {
            assert_eq!(err.error_name, "InvalidEntryPoint");
            assert!(err.to_string().contains("Missing.Op"));
        }
        other => panic!("expected azure error, got {other:?}"),
    }
}
