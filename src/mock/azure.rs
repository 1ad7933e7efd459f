//! Mock Azure Quantum workspace behind the `%azure.*` directives.

use serde_json::{Value as Json, json};

use super::{result, stderr};
use crate::protocol::ReplyMessage;

/// Workspace names containing this marker expose mock providers.
const MOCK_PROVIDERS_MARKER: &str = "MockProviders";

const MOCK_TARGETS: [(&str, &str, u64); 2] = [
    ("ionq.simulator", "Available", 3),
    ("honeywell.hqs-lt-s1-apival", "Available", 12),
];

#[derive(Debug, Clone, Copy)]
enum WorkspaceError {
    NotConnected,
    NoTarget,
    InvalidTarget,
    NoWorkspaceLocation,
    InvalidEntryPoint,
    JobNotFound,
    JobNotCompleted,
}

impl WorkspaceError {
    fn code(self) -> i64 {
        match self {
            WorkspaceError::NotConnected => 1000,
            WorkspaceError::NoTarget => 1001,
            WorkspaceError::InvalidTarget => 1002,
            WorkspaceError::NoWorkspaceLocation => 1003,
            WorkspaceError::InvalidEntryPoint => 1004,
            WorkspaceError::JobNotFound => 1005,
            WorkspaceError::JobNotCompleted => 1006,
        }
    }

    fn reply(self, description: &str) -> Vec<ReplyMessage> {
        vec![result(&json!({
            "error_code": self.code(),
            "error_name": format!("{self:?}"),
            "error_description": description,
        }))]
    }
}

#[derive(Debug, Clone)]
struct MockJob {
    record: Json,
    output: Option<Json>,
}

impl MockJob {
    fn matches(&self, filter: &str) -> bool {
        filter.is_empty()
            || ["id", "name", "target"].iter().any(|field| {
                self.record[*field]
                    .as_str()
                    .is_some_and(|value| value.contains(filter))
            })
    }
}

/// In-memory workspace state.
#[derive(Debug, Clone, Default)]
pub(super) struct MockWorkspace {
    workspace: Option<String>,
    targets: Vec<Json>,
    active_target: Option<String>,
    jobs: Vec<MockJob>,
}

impl MockWorkspace {
    /// Answer `%azure.<command> <rest>`; `callables` are the names the kernel knows.
    pub(super) fn handle(&mut self, command: &str, rest: &str, callables: &[String]) -> Vec<ReplyMessage> {
        let (subject, params) = match split_subject(rest) {
            Ok(parts) => parts,
            Err(err) => return vec![stderr(&format!("Invalid arguments: {err}\n"))],
        };
        if command != "connect" && self.workspace.is_none() {
            return WorkspaceError::NotConnected.reply("Not connected to any Azure Quantum workspace.");
        }

        match command {
            "connect" => self.connect(&params),
            "target" => self.target(&subject),
            "submit" => self.submit(&subject, &params, callables, false),
            "execute" => self.submit(&subject, &params, callables, true),
            "status" => match self.find_job(&subject) {
                Some(job) => vec![result(&job.record)],
                None => WorkspaceError::JobNotFound.reply(&format!("No job with id '{subject}'.")),
            },
            "output" => match self.find_job(&subject) {
                Some(MockJob { output: Some(output), .. }) => vec![result(output)],
                Some(_) => WorkspaceError::JobNotCompleted.reply("The job has not completed."),
                None => WorkspaceError::JobNotFound.reply(&format!("No job with id '{subject}'.")),
            },
            "jobs" => {
                let limit = params["count"].as_u64().map_or(usize::MAX, |count| count as usize);
                let jobs: Vec<&Json> = self
                    .jobs
                    .iter()
                    .filter(|job| job.matches(&subject))
                    .take(limit)
                    .map(|job| &job.record)
                    .collect();
                vec![result(&json!(jobs))]
            }
            other => vec![stderr(&format!("No such magic command: %azure.{other}\n"))],
        }
    }

    fn connect(&mut self, params: &Json) -> Vec<ReplyMessage> {
        let has_params = params.as_object().is_some_and(|params| !params.is_empty());
        if !has_params {
            return match self.workspace {
                Some(_) => vec![result(&json!(self.targets))],
                None => WorkspaceError::NotConnected.reply("Not connected to any Azure Quantum workspace."),
            };
        }
        if params["location"].as_str().is_none() {
            return WorkspaceError::NoWorkspaceLocation.reply("No location was given for the workspace.");
        }

        let name = params["workspace"]
            .as_str()
            .or_else(|| {
                params["resourceId"]
                    .as_str()
                    .and_then(|id| id.rsplit('/').next())
            })
            .unwrap_or_default()
            .to_string();
        self.targets = if name.contains(MOCK_PROVIDERS_MARKER) {
            MOCK_TARGETS
                .iter()
                .map(|(id, availability, queue)| {
                    json!({"id": id, "current_availability": availability, "average_queue_time": queue})
                })
                .collect()
        } else {
            Vec::new()
        };
        self.workspace = Some(name);
        self.active_target = None;
        self.jobs.clear();
        vec![result(&json!(self.targets))]
    }

    fn target(&mut self, name: &str) -> Vec<ReplyMessage> {
        let wanted = if name.is_empty() {
            match &self.active_target {
                Some(active) => active.clone(),
                None => return WorkspaceError::NoTarget.reply("No execution target has been specified."),
            }
        } else {
            name.to_string()
        };
        match self.targets.iter().find(|target| target["id"] == wanted.as_str()) {
            Some(target) => {
                self.active_target = Some(wanted);
                vec![result(target)]
            }
            None => WorkspaceError::InvalidTarget.reply(&format!("Target '{wanted}' is not available.")),
        }
    }

    fn submit(&mut self, op: &str, params: &Json, callables: &[String], wait: bool) -> Vec<ReplyMessage> {
        let Some(target) = self.active_target.clone() else {
            return WorkspaceError::NoTarget.reply("No execution target has been specified.");
        };
        if !callables.iter().any(|known| known == op) {
            return WorkspaceError::InvalidEntryPoint.reply(&format!("'{op}' is not a known operation."));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let provider = target.split('.').next().unwrap_or_default().to_string();
        let name = params["name"].as_str().unwrap_or(op);
        let mut record = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "name": name,
            "status": "Waiting",
            "provider": provider,
            "target": target,
            "creation_time": now,
            "begin_execution_time": null,
            "end_execution_time": null,
        });
        let shots = params["count"].as_u64().unwrap_or(500);
        let output = json!({"[0]": 0.5, "[1]": 0.5, "shots": shots});

        if wait {
            record["status"] = json!("Succeeded");
            record["begin_execution_time"] = json!(now);
            record["end_execution_time"] = json!(now);
            self.jobs.push(MockJob {
                record,
                output: Some(output.clone()),
            });
            return vec![result(&output)];
        }

        self.jobs.push(MockJob {
            record: record.clone(),
            output: None,
        });
        vec![result(&record)]
    }

    fn find_job(&self, id: &str) -> Option<&MockJob> {
        if id.is_empty() {
            return self.jobs.last();
        }
        self.jobs.iter().find(|job| job.record["id"] == id)
    }
}

/// Split `<subject> <json>`, `"<subject>" <json>` or `<json>`.
fn split_subject(rest: &str) -> Result<(String, Json), serde_json::Error> {
    let rest = rest.trim();
    let (subject, raw) = if rest.is_empty() || rest.starts_with('{') {
        ("", rest)
    } else if let Some(quoted) = rest.strip_prefix('"') {
        quoted
            .split_once('"')
            .map_or((quoted, ""), |(subject, raw)| (subject, raw.trim()))
    } else {
        rest.split_once(char::is_whitespace)
            .map_or((rest, ""), |(subject, raw)| (subject, raw.trim()))
    };
    let params = if raw.is_empty() {
        json!({})
    } else {
        serde_json::from_str(raw)?
    };
    Ok((subject.to_string(), params))
}
