#![forbid(unsafe_code)]
//! Async SDK client that drives a local CLI coding agent over a
//! bidirectional stream-json protocol on its stdin/stdout.
//!
//! This crate does not implement the agent CLI itself; it spawns one as a
//! child process, frames and demultiplexes its line-oriented JSON traffic,
//! and exposes a cancellable, streaming conversation to the host
//! application.

mod builder;
mod cancellation;
mod cli;
mod codec;
mod control;
mod error;
mod orchestrator;
mod process;
mod query;
mod router;
mod stream;
mod types;
mod validation;

pub use builder::{QueryOptions, QueryOptionsBuilder};
pub use cancellation::CancellationHandle;
pub use cli::{probe_version, resolve_launch_descriptor, LaunchDescriptor, LaunchKind};
pub use control::{BoxFuture, PermissionCallback};
pub use error::{SdkError, SdkResult};
pub use orchestrator::QueryOrchestrator;
pub use query::{query, run, QueryHandle, QueryInput};
pub use stream::FramedStream;
pub use types::{
    AgentMessage, AssistantMessage, AssistantPayload, ContentBlock, ControlRequestType,
    PermissionContext, PermissionDecision, PermissionMode, ResultMessage, ResultSubtype,
    StreamEventMessage, SystemMessage, Usage, UserContent, UserMessage, UserPayload,
};
pub use validation::{validate_options, ValidationError, ValidationInput, ValidationResult};
