use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

const VALID_TIMEOUT_KEYS: [&str; 4] = ["use_tool", "control", "stream_close", "total"];

/// Structural validation errors accumulated into one report, mirroring
/// the non-throwing contract callers rely on: a misconfigured set of
/// options is a value to inspect, not an exception to catch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }

    fn of(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// Adapter for callers who want validation failures represented as a
/// single `std::error::Error`, e.g. to bubble through `?` alongside
/// [`crate::error::SdkError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid query options: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

impl TryFrom<ValidationResult> for () {
    type Error = ValidationError;

    fn try_from(result: ValidationResult) -> Result<Self, Self::Error> {
        if result.valid() {
            Ok(())
        } else {
            Err(ValidationError {
                errors: result.errors,
            })
        }
    }
}

pub fn validate_command(command: &[String]) -> ValidationResult {
    let mut errors = Vec::new();
    if command.is_empty() {
        errors.push("command must be a non-empty list".to_string());
    }
    for (idx, arg) in command.iter().enumerate() {
        if arg.is_empty() {
            errors.push(format!("command[{idx}] must be a non-empty string"));
        }
    }
    ValidationResult::of(errors)
}

pub fn validate_timeouts(timeouts: &BTreeMap<String, i64>) -> ValidationResult {
    let mut errors = Vec::new();
    for (key, value) in timeouts {
        if !VALID_TIMEOUT_KEYS.contains(&key.as_str()) {
            errors.push(format!(
                "unknown timeout key `{key}`, expected one of {VALID_TIMEOUT_KEYS:?}"
            ));
        }
        if *value < 0 {
            errors.push(format!("timeout `{key}` must be a non-negative number of milliseconds"));
        }
    }
    ValidationResult::of(errors)
}

pub fn validate_mcp_servers(servers: &BTreeMap<String, Value>) -> ValidationResult {
    let mut errors = Vec::new();
    for (name, config) in servers {
        let has_command = config.get("command").and_then(Value::as_str).is_some();
        let has_url = config.get("url").and_then(Value::as_str).is_some();
        if !has_command && !has_url {
            errors.push(format!(
                "mcp server `{name}` must define either `command` or `url`"
            ));
        }
    }
    ValidationResult::of(errors)
}

pub fn validate_agents(agents: &[Value]) -> ValidationResult {
    let mut errors = Vec::new();
    for (idx, agent) in agents.iter().enumerate() {
        let has_name = agent.get("name").and_then(Value::as_str).is_some();
        let has_id = agent.get("id").and_then(Value::as_str).is_some();
        if !has_name && !has_id {
            errors.push(format!("agents[{idx}] must define either `name` or `id`"));
        }
    }
    ValidationResult::of(errors)
}

pub fn validate_working_dir(working_dir: Option<&std::path::Path>) -> ValidationResult {
    match working_dir {
        Some(path) if path.as_os_str().is_empty() => {
            ValidationResult::of(vec!["working_dir must not be empty".to_string()])
        }
        _ => ValidationResult::default(),
    }
}

/// `env` is already typed as `BTreeMap<String, String>`, so keys and values
/// can't fail to be strings; this check exists defensively for callers that
/// build the map from dynamic input, rejecting an empty key outright.
pub fn validate_env(env: &BTreeMap<String, String>) -> ValidationResult {
    let mut errors = Vec::new();
    for key in env.keys() {
        if key.is_empty() {
            errors.push("env key must not be empty".to_string());
        }
    }
    ValidationResult::of(errors)
}

/// The composite check every `QueryOptions` should pass through before a
/// query is started.
pub struct ValidationInput<'a> {
    pub command: &'a [String],
    pub timeouts: &'a BTreeMap<String, i64>,
    pub mcp_servers: &'a BTreeMap<String, Value>,
    pub agents: &'a [Value],
    pub working_dir: Option<&'a std::path::Path>,
    pub env: &'a BTreeMap<String, String>,
}

pub fn validate_options(input: ValidationInput<'_>) -> ValidationResult {
    let mut result = ValidationResult::default();
    result.merge(validate_command(input.command));
    result.merge(validate_timeouts(input.timeouts));
    result.merge(validate_mcp_servers(input.mcp_servers));
    result.merge(validate_agents(input.agents));
    result.merge(validate_working_dir(input.working_dir));
    result.merge(validate_env(input.env));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_invalid() {
        let result = validate_command(&[]);
        assert!(!result.valid());
    }

    #[test]
    fn unknown_timeout_key_is_reported() {
        let mut timeouts = BTreeMap::new();
        timeouts.insert("bogus".to_string(), 100);
        let result = validate_timeouts(&timeouts);
        assert!(!result.valid());
    }

    #[test]
    fn mcp_server_needs_command_or_url() {
        let mut servers = BTreeMap::new();
        servers.insert("fs".to_string(), serde_json::json!({}));
        let result = validate_mcp_servers(&servers);
        assert!(!result.valid());

        let mut ok_servers = BTreeMap::new();
        ok_servers.insert("fs".to_string(), serde_json::json!({"command": "mcp-fs"}));
        assert!(validate_mcp_servers(&ok_servers).valid());
    }

    #[test]
    fn agent_needs_name_or_id() {
        let agents = vec![serde_json::json!({"description": "no name"})];
        assert!(!validate_agents(&agents).valid());
    }

    #[test]
    fn empty_env_key_is_invalid() {
        let mut env = BTreeMap::new();
        env.insert(String::new(), "value".to_string());
        assert!(!validate_env(&env).valid());
    }

    #[test]
    fn well_formed_env_is_valid() {
        let mut env = BTreeMap::new();
        env.insert("API_KEY".to_string(), "secret".to_string());
        assert!(validate_env(&env).valid());
    }
}
