use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time;
use tracing::warn;

use crate::cancellation::CancellationHandle;
use crate::codec::{encode_control_request, encode_control_response};
use crate::error::SdkError;
use crate::process::ProcessChannel;
use crate::types::{
    ControlCancelFrame, ControlOutcome, ControlRequestFrame, ControlRequestType,
    PermissionContext, PermissionDecision,
};

pub const DEFAULT_TOOL_CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Host-supplied decision function for `can_use_tool` control requests.
pub type PermissionCallback =
    Arc<dyn Fn(String, Value, PermissionContext) -> BoxFuture<'static, PermissionDecision> + Send + Sync>;

type Pending = Arc<Mutex<HashMap<String, (String, oneshot::Sender<Result<Value, SdkError>>)>>>;

/// Owns the outbound correlation table and the inbound permission-dispatch
/// logic. Every in-flight outbound request is keyed by request-id; every
/// inbound request produces exactly one outbound response.
pub struct ControlPlane {
    pending: Pending,
    next_id: AtomicU64,
    permission_callback: Mutex<Option<PermissionCallback>>,
    tool_callback_timeout: Mutex<Duration>,
    control_request_timeout: Mutex<Duration>,
    request_id_to_tool_use_id: Mutex<HashMap<String, String>>,
    cancellation: CancellationHandle,
}

impl ControlPlane {
    pub fn new(cancellation: CancellationHandle) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            permission_callback: Mutex::new(None),
            tool_callback_timeout: Mutex::new(DEFAULT_TOOL_CALLBACK_TIMEOUT),
            control_request_timeout: Mutex::new(DEFAULT_CONTROL_REQUEST_TIMEOUT),
            request_id_to_tool_use_id: Mutex::new(HashMap::new()),
            cancellation,
        }
    }

    pub async fn set_permission_callback(&self, callback: Option<PermissionCallback>) {
        *self.permission_callback.lock().await = callback;
    }

    pub async fn set_tool_callback_timeout(&self, timeout: Duration) {
        *self.tool_callback_timeout.lock().await = timeout;
    }

    pub async fn set_control_request_timeout(&self, timeout: Duration) {
        *self.control_request_timeout.lock().await = timeout;
    }

    fn fresh_request_id(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("req_{id}")
    }

    /// Sends an outbound control request and awaits its correlated
    /// response, bounded by the configured control-request timeout and
    /// the shared cancellation handle.
    pub async fn send_request(
        &self,
        channel: &ProcessChannel,
        kind: ControlRequestType,
        data: Value,
    ) -> Result<Value, SdkError> {
        let request_id = self.fresh_request_id();
        let subtype = kind.as_str().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(request_id.clone(), (subtype.clone(), tx));
        }

        let frame = encode_control_request(&request_id, kind.as_str(), data);
        if let Err(err) = channel.write(&frame) {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        let timeout = *self.control_request_timeout.lock().await;
        let pending_for_timer = self.pending.clone();
        let timer_request_id = request_id.clone();
        let timer_subtype = subtype.clone();
        tokio::spawn(async move {
            time::sleep(timeout).await;
            // A resolver still present in the map means neither a response
            // nor a cancel arrived in time; firing twice is impossible
            // because removing the entry here is what makes the fire
            // effective, and every other completion path also removes it.
            if let Some((_, tx)) = pending_for_timer.lock().await.remove(&timer_request_id) {
                let _ = tx.send(Err(SdkError::ControlRequestTimeout {
                    subtype: timer_subtype,
                    timeout,
                }));
            }
        });

        tokio::select! {
            biased;
            result = rx => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(SdkError::Closed),
            },
            _ = self.cancellation.cancelled() => {
                self.pending.lock().await.remove(&request_id);
                Err(SdkError::Aborted)
            }
        }
    }

    /// Resolves (or rejects) the outbound request matching this inbound
    /// control response.
    pub async fn handle_response(&self, frame: ControlResponseFrameOwned) {
        let entry = self.pending.lock().await.remove(&frame.request_id);
        let Some((subtype, tx)) = entry else {
            return;
        };
        let result = match frame.outcome {
            ControlOutcome::Success(value) => Ok(value),
            ControlOutcome::Error(message) => {
                Err(SdkError::ControlRequestFailed { subtype, message })
            }
        };
        let _ = tx.send(result);
        self.request_id_to_tool_use_id
            .lock()
            .await
            .remove(&frame.request_id);
    }

    /// Looks up the tool-use-id a `can_use_tool` request was recorded
    /// under, for hosts that want to correlate a permission decision back
    /// to the originating tool call.
    pub async fn tool_use_id_for(&self, request_id: &str) -> Option<String> {
        self.request_id_to_tool_use_id.lock().await.get(request_id).cloned()
    }

    /// Rejects the outbound request matching this inbound cancel.
    pub async fn handle_cancel(&self, frame: &ControlCancelFrame) {
        if let Some((subtype, tx)) = self.pending.lock().await.remove(&frame.request_id) {
            let _ = tx.send(Err(SdkError::ControlRequestCancelled { subtype }));
        }
        self.request_id_to_tool_use_id
            .lock()
            .await
            .remove(&frame.request_id);
    }

    /// Rejects every still-pending outbound request. Called when the
    /// orchestrator closes.
    pub async fn reject_all(&self, err_factory: impl Fn() -> SdkError) {
        let mut pending = self.pending.lock().await;
        for (_, (_, tx)) in pending.drain() {
            let _ = tx.send(Err(err_factory()));
        }
    }

    /// Dispatches an inbound control request and writes exactly one
    /// correlated response.
    pub async fn dispatch_inbound(&self, channel: &ProcessChannel, frame: ControlRequestFrame) {
        let outcome = match frame.request.subtype.as_str() {
            "can_use_tool" => self.handle_can_use_tool(&frame).await,
            other => ControlOutcome::Error(format!("Unknown control request subtype: {other}")),
        };
        let response = encode_control_response(&frame.request_id, &outcome);
        if let Err(err) = channel.write(&response) {
            warn!("failed to write control response: {err}");
        }
    }

    async fn handle_can_use_tool(&self, frame: &ControlRequestFrame) -> ControlOutcome {
        let data = &frame.request.data;
        let tool_name = data
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input = data.get("input").cloned().unwrap_or(Value::Null);
        let tool_use_id = data.get("tool_use_id").and_then(Value::as_str).map(str::to_string);
        if let Some(tool_use_id) = tool_use_id {
            self.request_id_to_tool_use_id
                .lock()
                .await
                .insert(frame.request_id.clone(), tool_use_id);
        }
        let context = PermissionContext {
            suggestions: data.get("suggestions").cloned(),
        };

        let callback = self.permission_callback.lock().await.clone();
        let Some(callback) = callback else {
            return deny_outcome("Denied", false);
        };

        let timeout = *self.tool_callback_timeout.lock().await;
        // Run on its own task so a panicking callback can't take the
        // control plane down with it; a panic is reported the same way a
        // thrown exception would be in the source implementation.
        let task = tokio::spawn(callback(tool_name, input.clone(), context));
        let abort_handle = task.abort_handle();
        match time::timeout(timeout, task).await {
            Ok(Ok(decision)) => translate_decision(decision, input),
            Ok(Err(join_err)) => deny_outcome(&format!("Permission check failed: {}", panic_message(join_err)), false),
            Err(_) => {
                abort_handle.abort();
                deny_outcome("Permission callback timeout", false)
            }
        }
    }
}

fn translate_decision(decision: PermissionDecision, original_input: Value) -> ControlOutcome {
    match decision {
        PermissionDecision::Allow { updated_input } => ControlOutcome::Success(serde_json::json!({
            "behavior": "allow",
            "updatedInput": updated_input.unwrap_or(original_input),
        })),
        PermissionDecision::Deny { message, interrupt } => {
            let message = message.unwrap_or_else(|| "Denied".to_string());
            deny_outcome(&message, interrupt)
        }
    }
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    if let Ok(payload) = join_err.try_into_panic() {
        if let Some(message) = payload.downcast_ref::<&str>() {
            return message.to_string();
        }
        if let Some(message) = payload.downcast_ref::<String>() {
            return message.clone();
        }
        "non-string panic payload".to_string()
    } else {
        "permission callback task was cancelled".to_string()
    }
}

fn deny_outcome(message: &str, interrupt: bool) -> ControlOutcome {
    let mut body = serde_json::json!({
        "behavior": "deny",
        "message": message,
    });
    if interrupt {
        body["interrupt"] = Value::Bool(true);
    }
    ControlOutcome::Success(body)
}

/// Owned variant of [`crate::types::ControlResponseFrame`] used once the
/// router hands a response off to the control plane (the borrowed form
/// only exists transiently during classification).
pub type ControlResponseFrameOwned = crate::types::ControlResponseFrame;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_subtype_produces_error_outcome() {
        let plane = ControlPlane::new(CancellationHandle::new());
        let frame = ControlRequestFrame {
            request_id: "r1".to_string(),
            request: crate::types::ControlRequest {
                subtype: "something_new".to_string(),
                data: Value::Null,
            },
        };
        let outcome = match frame.request.subtype.as_str() {
            "can_use_tool" => plane.handle_can_use_tool(&frame).await,
            other => ControlOutcome::Error(format!("Unknown control request subtype: {other}")),
        };
        assert!(matches!(outcome, ControlOutcome::Error(_)));
    }

    #[tokio::test]
    async fn no_callback_registered_denies() {
        let plane = ControlPlane::new(CancellationHandle::new());
        let frame = ControlRequestFrame {
            request_id: "r1".to_string(),
            request: crate::types::ControlRequest {
                subtype: "can_use_tool".to_string(),
                data: serde_json::json!({"tool_name": "read_file", "input": {"path": "/a"}}),
            },
        };
        let outcome = plane.handle_can_use_tool(&frame).await;
        match outcome {
            ControlOutcome::Success(v) => assert_eq!(v["behavior"], "deny"),
            ControlOutcome::Error(_) => panic!("expected a deny success outcome"),
        }
    }

    #[tokio::test]
    async fn callback_timeout_produces_timeout_deny_message() {
        let plane = ControlPlane::new(CancellationHandle::new());
        plane.set_tool_callback_timeout(Duration::from_millis(10)).await;
        let callback: PermissionCallback = Arc::new(|_, _, _| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                PermissionDecision::allow()
            })
        });
        plane.set_permission_callback(Some(callback)).await;

        let frame = ControlRequestFrame {
            request_id: "r1".to_string(),
            request: crate::types::ControlRequest {
                subtype: "can_use_tool".to_string(),
                data: serde_json::json!({"tool_name": "write_file", "input": {}}),
            },
        };
        let outcome = plane.handle_can_use_tool(&frame).await;
        match outcome {
            ControlOutcome::Success(v) => {
                assert_eq!(v["behavior"], "deny");
                assert_eq!(v["message"], "Permission callback timeout");
            }
            ControlOutcome::Error(_) => panic!("expected a deny success outcome"),
        }
    }
}
