#![cfg(unix)]

use std::{
    fs,
    io::Write,
    os::unix::fs::PermissionsExt,
    time::Duration,
};

use agent_sdk::{query, run, AgentMessage, PermissionDecision, QueryOptions};
use tempfile::TempDir;

/// Writes a tiny shell script standing in for the agent CLI: it echoes a
/// fixed stream-json transcript for a `read_file` permission round-trip,
/// then a result, then exits. Good enough to exercise framing,
/// demultiplexing, and control-response correlation end to end without a
/// real agent binary.
fn write_fake_agent(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("fake_agent.sh");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn simple_prompt_yields_system_assistant_result_in_order() {
    let dir = TempDir::new().unwrap();
    let script = write_fake_agent(
        &dir,
        r#"
read _line
echo '{"type":"system","subtype":"session_start","uuid":"u1","session_id":"s"}'
echo '{"type":"assistant","uuid":"u2","session_id":"s","message":{"id":"m1","model":"test","content":[{"type":"text","text":"pong"}]}}'
echo '{"type":"result","subtype":"success","uuid":"u3","session_id":"s","is_error":false,"duration_ms":5,"duration_api_ms":4,"num_turns":1,"result":"pong","usage":{"input_tokens":1,"output_tokens":1}}'
"#,
    );

    let options = QueryOptions::builder()
        .command(vec![script.to_string_lossy().into_owned()])
        .build();

    let handle = query("ping", options);
    let mut seen = Vec::new();
    while let Some(item) = handle.recv().await {
        seen.push(item.expect("no transport errors expected"));
    }

    assert_eq!(seen.len(), 3);
    assert!(seen[0].is_system());
    assert!(seen[1].is_assistant());
    assert!(seen[2].is_result());
    if let AgentMessage::Result(result) = &seen[2] {
        assert_eq!(result.result.as_deref(), Some("pong"));
    } else {
        panic!("expected a result message");
    }
}

#[tokio::test]
async fn permission_allow_round_trip() {
    let dir = TempDir::new().unwrap();
    let script = write_fake_agent(
        &dir,
        r#"
read _line
echo '{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"read_file","tool_use_id":"t1","input":{"path":"/a"}}}'
read response
echo "$response" >&2
echo '{"type":"result","subtype":"success","uuid":"u3","session_id":"s","is_error":false,"duration_ms":1,"duration_api_ms":1,"num_turns":1,"result":"done"}'
"#,
    );

    let options = QueryOptions::builder()
        .command(vec![script.to_string_lossy().into_owned()])
        .permission_callback(std::sync::Arc::new(|tool_name, input, _ctx| {
            Box::pin(async move {
                assert_eq!(tool_name, "read_file");
                PermissionDecision::allow_with_input(input)
            })
        }))
        .build();

    let final_result = tokio::time::timeout(Duration::from_secs(5), run("ping", options))
        .await
        .expect("query should finish well within the timeout");

    assert!(!final_result.is_error);
    assert_eq!(final_result.result.as_deref(), Some("done"));
}
