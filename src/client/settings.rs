//! Kernel configuration settings (`%config`).

use std::collections::BTreeMap;
use std::fmt;

use crate::codec::Value;
use crate::error::{ClientError, Result};
use crate::protocol::Command;

/// File the kernel writes on `%config --save`, relative to its working directory.
pub const SETTINGS_FILE: &str = ".iqsharp-config.json";

/// Typed value of a kernel setting.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Free-form string.
    String(String),
}

impl ConfigValue {
    /// Rendering used on the right-hand side of `%config name=value`.
    pub fn to_directive_arg(&self) -> String {
        match self {
            ConfigValue::Bool(flag) => flag.to_string(),
            ConfigValue::Number(num) => num.to_string(),
            ConfigValue::String(text) => format!("'{text}'"),
        }
    }

    /// Interpret text typed by a user: `true`/`false`, a number, or a string.
    pub fn parse(text: &str) -> Self {
        match text {
            "true" => ConfigValue::Bool(true),
            "false" => ConfigValue::Bool(false),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|num| num.is_finite())
                .map(ConfigValue::Number)
                .unwrap_or_else(|| ConfigValue::String(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(text) => f.write_str(text),
            other => f.write_str(&other.to_directive_arg()),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(flag: bool) -> Self {
        ConfigValue::Bool(flag)
    }
}

impl From<i64> for ConfigValue {
    fn from(num: i64) -> Self {
        ConfigValue::Number(num as f64)
    }
}

impl From<f64> for ConfigValue {
    fn from(num: f64) -> Self {
        ConfigValue::Number(num)
    }
}

impl From<&str> for ConfigValue {
    fn from(text: &str) -> Self {
        ConfigValue::String(text.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(text: String) -> Self {
        ConfigValue::String(text)
    }
}

/// `%config name=value`.
pub fn set_command(name: &str, value: &ConfigValue) -> Command {
    Command::directive("config", Some(&format!("{name}={}", value.to_directive_arg())))
}

/// `%config --save`.
pub fn save_command() -> Command {
    Command::directive("config", Some("--save"))
}

/// Flatten a `%config` table (`{"rows": [{"Key": …, "Value": …}]}`).
pub fn parse_rows(table: &Value) -> Result<BTreeMap<String, Value>> {
    let rows = table
        .get("rows")
        .and_then(Value::as_slice)
        .ok_or_else(|| unexpected("result has no rows"))?;

    rows.iter()
        .map(|row| {
            let key = row
                .get("Key")
                .and_then(Value::as_str)
                .ok_or_else(|| unexpected("row has no Key"))?;
            let value = row.get("Value").cloned().unwrap_or(Value::Null);
            Ok((key.to_string(), value))
        })
        .collect()
}

fn unexpected(detail: &str) -> ClientError {
    ClientError::UnexpectedResult {
        directive: "%config".to_string(),
        detail: detail.to_string(),
    }
}
