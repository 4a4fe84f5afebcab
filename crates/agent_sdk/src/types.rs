use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the wire protocol, decoded but not yet classified by the
/// demultiplexer. Conversation messages are distinguished from control
/// frames by `type`; unknown tags are treated as opaque conversation
/// messages so that protocol evolution on the agent side never drops
/// a line outright.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(AgentMessage),
    ControlRequest(ControlRequestFrame),
    ControlResponse(ControlResponseFrame),
    ControlCancel(ControlCancelFrame),
}

/// A conversation message surfaced to application code. Unknown top-level
/// `type` values round-trip as `Unknown` rather than being dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
    Unknown(Value),
}

impl AgentMessage {
    pub fn is_user(&self) -> bool {
        matches!(self, AgentMessage::User(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, AgentMessage::Assistant(_))
    }

    pub fn is_system(&self) -> bool {
        matches!(self, AgentMessage::System(_))
    }

    pub fn is_result(&self) -> bool {
        matches!(self, AgentMessage::Result(_))
    }

    pub fn is_partial_assistant(&self) -> bool {
        matches!(self, AgentMessage::StreamEvent(_))
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            AgentMessage::User(m) => Some(&m.session_id),
            AgentMessage::Assistant(m) => Some(&m.session_id),
            AgentMessage::System(m) => Some(&m.session_id),
            AgentMessage::Result(m) => Some(&m.session_id),
            AgentMessage::StreamEvent(m) => Some(&m.session_id),
            AgentMessage::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub session_id: String,
    pub message: UserPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    pub role: String,
    pub content: UserContent,
}

/// The agent accepts either a plain string or a sequence of content blocks
/// as user message content; the SDK preserves whichever shape the caller
/// supplied rather than normalizing one into the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub session_id: String,
    pub uuid: String,
    pub message: AssistantPayload,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantPayload {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub session_id: String,
    pub subtype: String,
    pub uuid: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub session_id: String,
    pub uuid: String,
    pub subtype: ResultSubtype,
    pub is_error: bool,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub usage: Option<Usage>,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    ErrorMaxTurns,
    ErrorDuringExecution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMessage {
    pub session_id: String,
    pub uuid: String,
    pub event: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking { .. })
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

// --- control plane frames -------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequestFrame {
    pub request_id: String,
    pub request: ControlRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub subtype: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponseFrame {
    pub request_id: String,
    pub outcome: ControlOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    Success(Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCancelFrame {
    pub request_id: String,
}

/// Subtypes the SDK can send as an outbound control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequestType {
    Initialize,
    Interrupt,
    CanUseTool,
    SetPermissionMode,
    SetModel,
    McpMessage,
    McpServerStatus,
    HookCallback,
    SupportedCommands,
}

impl ControlRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlRequestType::Initialize => "initialize",
            ControlRequestType::Interrupt => "interrupt",
            ControlRequestType::CanUseTool => "can_use_tool",
            ControlRequestType::SetPermissionMode => "set_permission_mode",
            ControlRequestType::SetModel => "set_model",
            ControlRequestType::McpMessage => "mcp_message",
            ControlRequestType::McpServerStatus => "mcp_server_status",
            ControlRequestType::HookCallback => "hook_callback",
            ControlRequestType::SupportedCommands => "supported_commands",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    Default,
    Plan,
    #[serde(rename = "auto-edit")]
    AutoEdit,
    Yolo,
}

/// The host's decision for a single `can_use_tool` control request.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    Allow {
        updated_input: Option<Value>,
    },
    Deny {
        message: Option<String>,
        interrupt: bool,
    },
}

impl PermissionDecision {
    pub fn allow() -> Self {
        PermissionDecision::Allow {
            updated_input: None,
        }
    }

    pub fn allow_with_input(updated_input: Value) -> Self {
        PermissionDecision::Allow {
            updated_input: Some(updated_input),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        PermissionDecision::Deny {
            message: Some(message.into()),
            interrupt: false,
        }
    }

    pub fn deny_with_interrupt(message: impl Into<String>) -> Self {
        PermissionDecision::Deny {
            message: Some(message.into()),
            interrupt: true,
        }
    }
}

/// Context passed alongside a `can_use_tool` permission callback invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionContext {
    pub suggestions: Option<Value>,
}
