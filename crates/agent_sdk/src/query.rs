use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_json::Value;

use crate::builder::QueryOptions;
use crate::error::SdkError;
use crate::orchestrator::QueryOrchestrator;
use crate::types::{AgentMessage, ResultMessage, ResultSubtype};

/// Either a single string prompt (wrapped as one user message) or an
/// explicit sequence of already-shaped user-message frames.
pub enum QueryInput {
    Prompt(String),
    Messages(Vec<Value>),
}

impl From<&str> for QueryInput {
    fn from(value: &str) -> Self {
        QueryInput::Prompt(value.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(value: String) -> Self {
        QueryInput::Prompt(value)
    }
}

impl From<Vec<Value>> for QueryInput {
    fn from(value: Vec<Value>) -> Self {
        QueryInput::Messages(value)
    }
}

fn wrap_prompt(prompt: &str) -> Value {
    serde_json::json!({
        "type": "user",
        "message": { "role": "user", "content": prompt },
    })
}

fn input_frames(input: QueryInput) -> Vec<Value> {
    match input {
        QueryInput::Prompt(text) => vec![wrap_prompt(&text)],
        QueryInput::Messages(messages) => messages,
    }
}

/// A lazy conversation sequence. Initializes the underlying orchestrator
/// and streams the supplied input on the first call to `recv`; closes the
/// orchestrator automatically once the sequence is exhausted.
pub struct QueryHandle {
    orchestrator: Arc<QueryOrchestrator>,
    pending_input: std::sync::Mutex<Option<Vec<Value>>>,
    started: AtomicBool,
}

impl QueryHandle {
    fn new(orchestrator: Arc<QueryOrchestrator>, frames: Vec<Value>) -> Self {
        Self {
            orchestrator,
            pending_input: std::sync::Mutex::new(Some(frames)),
            started: AtomicBool::new(false),
        }
    }

    /// Awaits the next conversation message, initializing and streaming
    /// input on the very first call.
    pub async fn recv(&self) -> Option<Result<AgentMessage, Arc<SdkError>>> {
        if !self.started.swap(true, Ordering::SeqCst) {
            let frames = self.pending_input.lock().expect("pending_input mutex poisoned").take().unwrap_or_default();
            if let Err(err) = self.orchestrator.stream_input(frames).await {
                return Some(Err(Arc::new(err)));
            }
        }

        let item = self.orchestrator.recv().await;
        if item.is_none() {
            self.orchestrator.close().await;
        }
        item
    }

    /// Aborts the query early, closing the orchestrator even if the
    /// sequence has not been fully drained.
    pub async fn close(&self) {
        self.orchestrator.close().await;
    }

    pub fn session_id_handle(&self) -> Arc<QueryOrchestrator> {
        self.orchestrator.clone()
    }
}

/// Constructs a [`QueryHandle`] from a prompt or explicit message sequence.
/// The orchestrator is not spawned until the first `recv` call.
pub fn query(input: impl Into<QueryInput>, options: QueryOptions) -> QueryHandle {
    let frames = input_frames(input.into());
    let orchestrator = QueryOrchestrator::new(options);
    QueryHandle::new(orchestrator, frames)
}

/// Drives a query to completion and returns the last result-tagged
/// message observed. If the child never emits one (e.g. it crashes before
/// producing a result), synthesizes an error result instead of panicking.
pub async fn run(input: impl Into<QueryInput>, options: QueryOptions) -> ResultMessage {
    let handle = query(input, options);
    let mut last_result: Option<ResultMessage> = None;

    while let Some(item) = handle.recv().await {
        match item {
            Ok(AgentMessage::Result(result)) => last_result = Some(result),
            Ok(_) => {}
            Err(err) => {
                return synthetic_error_result(err.to_string());
            }
        }
    }

    last_result.unwrap_or_else(|| synthetic_error_result("agent exited without a result message".to_string()))
}

fn synthetic_error_result(message: String) -> ResultMessage {
    ResultMessage {
        session_id: String::new(),
        uuid: String::new(),
        subtype: ResultSubtype::ErrorDuringExecution,
        is_error: true,
        duration_ms: 0,
        duration_api_ms: 0,
        num_turns: 0,
        usage: None,
        result: Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_wrapped_as_a_single_user_message() {
        let frames = input_frames(QueryInput::Prompt("ping".to_string()));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "user");
        assert_eq!(frames[0]["message"]["content"], "ping");
    }

    #[test]
    fn explicit_messages_pass_through_unchanged() {
        let msg = serde_json::json!({"type": "user", "message": {"role": "user", "content": "hi"}});
        let frames = input_frames(QueryInput::Messages(vec![msg.clone()]));
        assert_eq!(frames, vec![msg]);
    }
}
