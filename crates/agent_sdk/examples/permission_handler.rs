//! Demonstrates a custom permission callback: read tools are auto-allowed,
//! write tools are denied.
//!
//! Usage:
//! - `AGENT_SDK_BINARY=/path/to/qwen cargo run -p agent_sdk --example permission_handler`

use std::env;
use std::sync::Arc;

use agent_sdk::{query, AgentMessage, PermissionDecision, QueryOptions};

#[tokio::main]
async fn main() {
    let Some(binary) = env::var("AGENT_SDK_BINARY").ok() else {
        eprintln!("set AGENT_SDK_BINARY to a real agent CLI binary to run this example");
        return;
    };

    println!("Note: write tools will be denied, read tools will be allowed.\n");

    let options = QueryOptions::builder()
        .command(vec![binary])
        .permission_callback(Arc::new(|tool_name, input, _context| {
            Box::pin(async move {
                if tool_name.starts_with("read_") {
                    println!("[permission] auto-allowing read tool: {tool_name}");
                    PermissionDecision::allow_with_input(input)
                } else {
                    println!("[permission] denying write tool: {tool_name}");
                    PermissionDecision::deny(format!("Permission denied for: {tool_name}"))
                }
            })
        }))
        .build();

    let handle = query(
        "Read the current directory and list files, then try to create a new file",
        options,
    );

    while let Some(item) = handle.recv().await {
        match item {
            Ok(AgentMessage::Assistant(message)) => {
                for block in &message.message.content {
                    if let agent_sdk::ContentBlock::Text { text } = block {
                        println!("Assistant: {text}\n");
                    }
                }
            }
            Ok(AgentMessage::Result(result)) => {
                if let Some(text) = &result.result {
                    println!("Result: {text}\n");
                }
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("query failed: {err}");
                break;
            }
        }
    }

    println!("Query completed!");
}
