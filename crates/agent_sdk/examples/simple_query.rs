//! Demonstrates a single-turn query against a real agent binary.
//!
//! Usage:
//! - `AGENT_SDK_BINARY=/path/to/qwen cargo run -p agent_sdk --example simple_query -- "your prompt"`
//!
//! Without `AGENT_SDK_BINARY` this prints a short explanation and exits
//! without spawning anything, since there is no bundled agent binary to
//! run against in this workspace.

use std::env;

use agent_sdk::{query, AgentMessage, QueryOptions};

#[tokio::main]
async fn main() {
    let Some(binary) = env::var("AGENT_SDK_BINARY").ok() else {
        eprintln!("set AGENT_SDK_BINARY to a real agent CLI binary to run this example");
        return;
    };

    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.is_empty() {
        "List 3 popular Rust web frameworks".to_string()
    } else {
        prompt
    };

    let options = QueryOptions::builder().command(vec![binary]).build();
    let handle = query(prompt, options);

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
