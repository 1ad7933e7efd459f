//! Azure Quantum directives (`%azure.*`).
//!
//! The kernel never reports workspace failures on its error stream; instead a
//! result carrying `error_code` comes back, which is surfaced as
//! [`ClientError::Azure`]. Records keep any fields beyond the documented ones
//! in `extra`.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::{CallableRef, Client};
use crate::codec::{self, Value};
use crate::error::{AzureError, ClientError, Result};
use crate::protocol::{Arguments, Command};
use crate::session::ExecuteOptions;

/// An execution target of the connected workspace.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AzureTarget {
    /// Target id, e.g. `ionq.simulator`.
    pub id: String,
    /// Availability reported by the provider.
    pub current_availability: String,
    /// Average queue time in seconds, if known.
    #[serde(default)]
    pub average_queue_time: Option<f64>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

/// A job in the connected workspace.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AzureJob {
    /// Job id.
    pub id: String,
    /// Job name.
    pub name: String,
    /// Status, e.g. `Waiting` or `Succeeded`.
    pub status: String,
    /// Provider id.
    pub provider: String,
    /// Target id.
    pub target: String,
    /// Creation time (RFC 3339).
    pub creation_time: String,
    /// Start of execution, once started.
    pub begin_execution_time: Option<String>,
    /// End of execution, once finished.
    pub end_execution_time: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Json>,
}

impl AzureJob {
    /// Whether the job reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "Succeeded" | "Failed" | "Cancelled")
    }
}

impl Client {
    /// Connect to a workspace (or report the current connection) and list
    /// its targets.
    pub fn azure_connect(&self, params: &Arguments) -> Result<Vec<AzureTarget>> {
        self.azure(
            "%azure.connect",
            Command::parameterized("azure.connect", params),
        )
    }

    /// Set the active target, or report it when `name` is empty.
    pub fn azure_target(&self, name: &str, params: &Arguments) -> Result<AzureTarget> {
        self.azure(
            "%azure.target",
            Command::targeted("azure.target", name, params),
        )
    }

    /// Submit a job for `op` to the active target.
    pub fn azure_submit(&self, op: &CallableRef, params: &Arguments) -> Result<AzureJob> {
        self.azure(
            "%azure.submit",
            Command::callable("azure.submit", op.name(), params),
        )
    }

    /// Submit a job for `op`, wait for it and return its output histogram.
    pub fn azure_execute(&self, op: &CallableRef, params: &Arguments) -> Result<Value> {
        let output: Json = self.azure(
            "%azure.execute",
            Command::callable("azure.execute", op.name(), params),
        )?;
        Ok(codec::decode(&output)?)
    }

    /// Status of a job; the most recent one when `job_id` is empty.
    pub fn azure_status(&self, job_id: &str, params: &Arguments) -> Result<AzureJob> {
        self.azure(
            "%azure.status",
            Command::targeted("azure.status", job_id, params),
        )
    }

    /// Output histogram of a finished job; the most recent one when `job_id`
    /// is empty.
    pub fn azure_output(&self, job_id: &str, params: &Arguments) -> Result<Value> {
        let output: Json = self.azure(
            "%azure.output",
            Command::targeted("azure.output", job_id, params),
        )?;
        Ok(codec::decode(&output)?)
    }

    /// Jobs whose id, name or target contains `filter` (all jobs when empty).
    pub fn azure_jobs(&self, filter: &str, params: &Arguments) -> Result<Vec<AzureJob>> {
        self.azure(
            "%azure.jobs",
            Command::targeted("azure.jobs", &format!("\"{filter}\""), params),
        )
    }

    fn azure<T: DeserializeOwned>(&self, directive: &str, command: Command) -> Result<T> {
        let outcome = self
            .dispatcher
            .dispatch(&command, ExecuteOptions::default().raise_on_stderr(false))?;
        let content = outcome.content.unwrap_or(Json::Null);
        let unexpected = |err: serde_json::Error| ClientError::UnexpectedResult {
            directive: directive.to_string(),
            detail: err.to_string(),
        };

        if content.get("error_code").is_some() {
            let err: AzureError = serde_json::from_value(content).map_err(unexpected)?;
            debug!(directive, code = err.error_code, name = %err.error_name, "azure directive failed");
            return Err(err.into());
        }
        serde_json::from_value(content).map_err(unexpected)
    }
}
