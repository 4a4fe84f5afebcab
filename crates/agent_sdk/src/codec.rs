use serde_json::Value;

use crate::types::{
    AgentMessage, AssistantMessage, AssistantPayload, ControlCancelFrame, ControlOutcome,
    ControlRequest, ControlRequestFrame, ControlResponseFrame, Frame, ResultMessage,
    ResultSubtype, StreamEventMessage, SystemMessage, Usage, UserMessage,
};

/// Encodes a value as one compact, newline-terminated JSON line, matching
/// the wire format the agent process expects on its stdin.
pub fn encode_line(value: &Value) -> String {
    let mut out = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    out.push('\n');
    out
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed stream-json line: {message}")]
pub struct DecodeError {
    pub message: String,
}

/// Decodes one already-newline-stripped line into a raw JSON value.
/// Malformed lines are reported but never panic; callers drop them and
/// keep reading.
pub fn decode_line(line: &str) -> Result<Value, DecodeError> {
    let trimmed = line.trim_end_matches('\r');
    serde_json::from_str(trimmed).map_err(|err| DecodeError {
        message: err.to_string(),
    })
}

/// Classifies a decoded JSON value into a conversation message or a control
/// frame. Unknown `type` tags fall back to an opaque conversation message
/// so the demultiplexer never silently drops a line.
pub fn classify(value: Value) -> Frame {
    let tag = value.get("type").and_then(Value::as_str).unwrap_or("");

    match tag {
        "control_request" => parse_control_request(value)
            .map(Frame::ControlRequest)
            .unwrap_or_else(|| Frame::Message(AgentMessage::Unknown(value))),
        "control_response" => parse_control_response(value)
            .map(Frame::ControlResponse)
            .unwrap_or_else(|| Frame::Message(AgentMessage::Unknown(value))),
        "control_cancel_request" => parse_control_cancel(value)
            .map(Frame::ControlCancel)
            .unwrap_or_else(|| Frame::Message(AgentMessage::Unknown(value))),
        "user" => parse_user(value).map(Frame::Message).unwrap_or_else(|v| Frame::Message(AgentMessage::Unknown(v))),
        "assistant" => parse_assistant(value)
            .map(Frame::Message)
            .unwrap_or_else(|v| Frame::Message(AgentMessage::Unknown(v))),
        "system" => parse_system(value).map(Frame::Message).unwrap_or_else(|v| Frame::Message(AgentMessage::Unknown(v))),
        "result" => parse_result(value).map(Frame::Message).unwrap_or_else(|v| Frame::Message(AgentMessage::Unknown(v))),
        "stream_event" => parse_stream_event(value)
            .map(Frame::Message)
            .unwrap_or_else(|v| Frame::Message(AgentMessage::Unknown(v))),
        _ => Frame::Message(AgentMessage::Unknown(value)),
    }
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_control_request(value: Value) -> Option<ControlRequestFrame> {
    let request_id = field_str(&value, "request_id")?;
    let request = value.get("request")?;
    let subtype = field_str(request, "subtype")?;
    Some(ControlRequestFrame {
        request_id,
        request: ControlRequest {
            subtype,
            data: request.clone(),
        },
    })
}

fn parse_control_response(value: Value) -> Option<ControlResponseFrame> {
    let response = value.get("response")?;
    let request_id = field_str(response, "request_id")?;
    let subtype = field_str(response, "subtype")?;
    let outcome = match subtype.as_str() {
        "success" => ControlOutcome::Success(response.get("response").cloned().unwrap_or(Value::Null)),
        "error" => {
            let message = response
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| response.get("error").and_then(Value::as_str))
                .unwrap_or("unknown control error")
                .to_string();
            ControlOutcome::Error(message)
        }
        _ => return None,
    };
    Some(ControlResponseFrame {
        request_id,
        outcome,
    })
}

fn parse_control_cancel(value: Value) -> Option<ControlCancelFrame> {
    let request_id = field_str(&value, "request_id")?;
    Some(ControlCancelFrame { request_id })
}

fn parse_user(value: Value) -> Result<AgentMessage, Value> {
    match serde_json::from_value::<UserMessage>(value.clone()) {
        Ok(m) => Ok(AgentMessage::User(m)),
        Err(_) => Err(value),
    }
}

fn parse_assistant(value: Value) -> Result<AgentMessage, Value> {
    let session_id = match field_str(&value, "session_id") {
        Some(s) => s,
        None => return Err(value),
    };
    let uuid = match field_str(&value, "uuid") {
        Some(s) => s,
        None => return Err(value),
    };
    let message = match value.get("message") {
        Some(m) => m,
        None => return Err(value),
    };
    let payload: AssistantPayload = match serde_json::from_value(message.clone()) {
        Ok(p) => p,
        Err(_) => return Err(value),
    };
    let parent_tool_use_id = field_str(&value, "parent_tool_use_id");
    Ok(AgentMessage::Assistant(AssistantMessage {
        session_id,
        uuid,
        message: payload,
        parent_tool_use_id,
    }))
}

fn parse_system(value: Value) -> Result<AgentMessage, Value> {
    let session_id = match field_str(&value, "session_id") {
        Some(s) => s,
        None => return Err(value),
    };
    let subtype = field_str(&value, "subtype").unwrap_or_default();
    let uuid = field_str(&value, "uuid").unwrap_or_default();
    Ok(AgentMessage::System(SystemMessage {
        session_id,
        subtype,
        uuid,
        data: value,
    }))
}

fn parse_result(value: Value) -> Result<AgentMessage, Value> {
    let session_id = match field_str(&value, "session_id") {
        Some(s) => s,
        None => return Err(value),
    };
    let uuid = field_str(&value, "uuid").unwrap_or_default();
    let subtype = match value.get("subtype").and_then(Value::as_str) {
        Some("success") => ResultSubtype::Success,
        Some("error_max_turns") => ResultSubtype::ErrorMaxTurns,
        Some("error_during_execution") => ResultSubtype::ErrorDuringExecution,
        _ => return Err(value),
    };
    let usage = value
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
    Ok(AgentMessage::Result(ResultMessage {
        session_id,
        uuid,
        subtype,
        is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        duration_ms: value.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        duration_api_ms: value
            .get("duration_api_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        num_turns: value
            .get("num_turns")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        usage,
        result: field_str(&value, "result"),
    }))
}

fn parse_stream_event(value: Value) -> Result<AgentMessage, Value> {
    let session_id = match field_str(&value, "session_id") {
        Some(s) => s,
        None => return Err(value),
    };
    let uuid = field_str(&value, "uuid").unwrap_or_default();
    let event = value.get("event").cloned().unwrap_or(Value::Null);
    Ok(AgentMessage::StreamEvent(StreamEventMessage {
        session_id,
        uuid,
        event,
    }))
}

/// Builds the wire-format JSON for an outbound control response, matching
/// the success/error encoding the agent process expects.
pub fn encode_control_response(request_id: &str, outcome: &ControlOutcome) -> Value {
    let response = match outcome {
        ControlOutcome::Success(data) => serde_json::json!({
            "subtype": "success",
            "request_id": request_id,
            "response": data,
        }),
        ControlOutcome::Error(message) => serde_json::json!({
            "subtype": "error",
            "request_id": request_id,
            "error": { "message": message },
        }),
    };
    serde_json::json!({
        "type": "control_response",
        "response": response,
    })
}

/// Builds the wire-format JSON for an outbound control request.
pub fn encode_control_request(request_id: &str, subtype: &str, data: Value) -> Value {
    let mut request = match data {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    request.insert("subtype".to_string(), Value::String(subtype.to_string()));
    serde_json::json!({
        "type": "control_request",
        "request_id": request_id,
        "request": Value::Object(request),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_result_message() {
        let value = serde_json::json!({
            "type": "result",
            "subtype": "success",
            "session_id": "s1",
            "uuid": "u1",
            "is_error": false,
            "duration_ms": 5,
            "duration_api_ms": 4,
            "num_turns": 1,
            "result": "pong",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });
        let frame = classify(value);
        match frame {
            Frame::Message(AgentMessage::Result(r)) => {
                assert_eq!(r.subtype, ResultSubtype::Success);
                assert_eq!(r.result.as_deref(), Some("pong"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_line_is_reported_not_panicked() {
        let err = decode_line("{not-json}").unwrap_err();
        assert!(err.message.len() > 0);
    }

    #[test]
    fn control_response_error_places_message_under_error() {
        let outcome = ControlOutcome::Error("boom".to_string());
        let value = encode_control_response("r1", &outcome);
        assert_eq!(
            value["response"]["error"]["message"],
            Value::String("boom".to_string())
        );
    }

    #[test]
    fn unknown_type_tag_round_trips_as_unknown() {
        let value = serde_json::json!({"type": "from_the_future", "foo": "bar"});
        let frame = classify(value.clone());
        assert_eq!(frame, Frame::Message(AgentMessage::Unknown(value)));
    }
}
