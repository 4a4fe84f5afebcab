use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde_json::Value;

use crate::cancellation::CancellationHandle;
use crate::control::PermissionCallback;
use crate::validation::{validate_options, ValidationInput, ValidationResult};

pub(crate) const DEFAULT_COMMAND: &[&str] = &["qwen", "sdk", "--channel=SDK"];

/// Fully resolved options for one query. Constructed through
/// [`QueryOptionsBuilder`]; validated on demand via [`QueryOptions::validate`]
/// rather than at construction time, matching the documented non-throwing
/// validation contract.
#[derive(Clone)]
pub struct QueryOptions {
    pub(crate) command: Vec<String>,
    pub(crate) command_explicit: bool,
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) cancellation: CancellationHandle,
    pub(crate) debug_io: bool,
    pub(crate) single_turn: bool,
    pub(crate) tool_callback_timeout: Duration,
    pub(crate) control_request_timeout: Duration,
    pub(crate) stream_close_timeout: Duration,
    pub(crate) permission_callback: Option<PermissionCallback>,
    pub(crate) mcp_servers: BTreeMap<String, Value>,
    pub(crate) agents: Vec<Value>,
}

impl QueryOptions {
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }

    pub fn validate(&self) -> ValidationResult {
        let timeouts_ms: BTreeMap<String, i64> = [
            ("use_tool".to_string(), self.tool_callback_timeout.as_millis() as i64),
            ("control".to_string(), self.control_request_timeout.as_millis() as i64),
            ("stream_close".to_string(), self.stream_close_timeout.as_millis() as i64),
        ]
        .into_iter()
        .collect();

        validate_options(ValidationInput {
            command: &self.command,
            timeouts: &timeouts_ms,
            mcp_servers: &self.mcp_servers,
            agents: &self.agents,
            working_dir: self.working_dir.as_deref(),
            env: &self.env,
        })
    }
}

#[derive(Clone)]
pub struct QueryOptionsBuilder {
    command: Vec<String>,
    command_explicit: bool,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    cancellation: Option<CancellationHandle>,
    debug_io: bool,
    single_turn: bool,
    tool_callback_timeout: Duration,
    control_request_timeout: Duration,
    stream_close_timeout: Duration,
    permission_callback: Option<PermissionCallback>,
    mcp_servers: BTreeMap<String, Value>,
    agents: Vec<Value>,
}

impl Default for QueryOptionsBuilder {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect(),
            command_explicit: false,
            working_dir: None,
            env: BTreeMap::new(),
            cancellation: None,
            debug_io: false,
            single_turn: false,
            tool_callback_timeout: crate::control::DEFAULT_TOOL_CALLBACK_TIMEOUT,
            control_request_timeout: crate::control::DEFAULT_CONTROL_REQUEST_TIMEOUT,
            stream_close_timeout: Duration::from_secs(60),
            permission_callback: None,
            mcp_servers: BTreeMap::new(),
            agents: Vec::new(),
        }
    }
}

impl QueryOptionsBuilder {
    /// Overrides the default launch command. Once set explicitly, the
    /// factory's CLI discovery chain (`PATH` search, common install
    /// locations, package-runner fallback) is skipped in favor of this
    /// exact command.
    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self.command_explicit = true;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cancellation(mut self, handle: CancellationHandle) -> Self {
        self.cancellation = Some(handle);
        self
    }

    pub fn debug_io(mut self, enabled: bool) -> Self {
        self.debug_io = enabled;
        self
    }

    pub fn single_turn(mut self, enabled: bool) -> Self {
        self.single_turn = enabled;
        self
    }

    pub fn tool_callback_timeout(mut self, timeout: Duration) -> Self {
        self.tool_callback_timeout = timeout;
        self
    }

    pub fn control_request_timeout(mut self, timeout: Duration) -> Self {
        self.control_request_timeout = timeout;
        self
    }

    pub fn stream_close_timeout(mut self, timeout: Duration) -> Self {
        self.stream_close_timeout = timeout;
        self
    }

    pub fn permission_callback(mut self, callback: PermissionCallback) -> Self {
        self.permission_callback = Some(callback);
        self
    }

    pub fn mcp_server(mut self, name: impl Into<String>, config: Value) -> Self {
        self.mcp_servers.insert(name.into(), config);
        self
    }

    pub fn agent(mut self, config: Value) -> Self {
        self.agents.push(config);
        self
    }

    pub fn build(self) -> QueryOptions {
        QueryOptions {
            command: self.command,
            command_explicit: self.command_explicit,
            working_dir: self.working_dir,
            env: self.env,
            cancellation: self.cancellation.unwrap_or_default(),
            debug_io: self.debug_io,
            single_turn: self.single_turn,
            tool_callback_timeout: self.tool_callback_timeout,
            control_request_timeout: self.control_request_timeout,
            stream_close_timeout: self.stream_close_timeout,
            permission_callback: self.permission_callback,
            mcp_servers: self.mcp_servers,
            agents: self.agents,
        }
    }
}
