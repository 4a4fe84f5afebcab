use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::builder::QueryOptions;
use crate::cancellation::CancellationHandle;
use crate::cli::resolve_launch_descriptor;
use crate::control::ControlPlane;
use crate::error::SdkError;
use crate::process::ProcessChannel;
use crate::router;
use crate::stream::FramedStream;
use crate::types::{AgentMessage, ControlRequestType, PermissionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Initialized,
    Closed,
}

type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

struct ListenerEntry {
    callback: EventCallback,
    once: bool,
}

/// The public conversation entity: owns a process channel, a control
/// plane, and an output sequence of conversation messages. Application
/// code drives it through `initialize`, `stream_input`, and by consuming
/// `recv` in a loop; `close` is safe to call multiple times and from any
/// state.
pub struct QueryOrchestrator {
    options: QueryOptions,
    cancellation: CancellationHandle,
    state: Mutex<State>,
    channel: Mutex<Option<Arc<ProcessChannel>>>,
    control: Arc<ControlPlane>,
    output: Arc<FramedStream<AgentMessage>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
    cancel_watcher: Mutex<Option<JoinHandle<()>>>,
    session_id: Mutex<Option<String>>,
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
}

impl QueryOrchestrator {
    pub fn new(options: QueryOptions) -> Arc<Self> {
        let cancellation = options.cancellation.clone();
        Arc::new(Self {
            options,
            control: Arc::new(ControlPlane::new(cancellation.clone())),
            output: Arc::new(FramedStream::new(cancellation.clone())),
            cancellation,
            state: Mutex::new(State::New),
            channel: Mutex::new(None),
            router_task: Mutex::new(None),
            cancel_watcher: Mutex::new(None),
            session_id: Mutex::new(None),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    /// Idempotent: spawns the child and the background router exactly
    /// once. Raises if the orchestrator has already been closed.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SdkError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Initialized => return Ok(()),
            State::Closed => return Err(SdkError::Closed),
            State::New => {}
        }

        let command = self.resolve_command().await?;

        let channel = Arc::new(
            ProcessChannel::spawn(
                command,
                self.options.working_dir.clone(),
                self.options.env.clone(),
                self.cancellation.clone(),
                self.options.debug_io,
            )
            .await?,
        );

        *self.channel.lock().await = Some(channel.clone());

        if let Some(callback) = self.options.permission_callback.clone() {
            self.control.set_permission_callback(Some(callback)).await;
        }
        self.control
            .set_tool_callback_timeout(self.options.tool_callback_timeout)
            .await;
        self.control
            .set_control_request_timeout(self.options.control_request_timeout)
            .await;

        let router_handle = tokio::spawn(router::run(
            channel,
            self.control.clone(),
            self.output.clone(),
        ));
        *self.router_task.lock().await = Some(router_handle);

        let watcher_self = self.clone();
        let watcher_handle = tokio::spawn(async move {
            watcher_self.cancellation.cancelled().await;
            watcher_self.close().await;
        });
        *self.cancel_watcher.lock().await = Some(watcher_handle);

        *state = State::Initialized;
        Ok(())
    }

    /// Resolves the actual command to launch. A user-supplied command is
    /// used verbatim; otherwise the CLI discovery chain (`PATH`, common
    /// install locations, package-runner fallback) resolves the binary and
    /// the default command's trailing arguments are appended to it.
    async fn resolve_command(&self) -> Result<Vec<String>, SdkError> {
        if self.options.command_explicit {
            return Ok(self.options.command.clone());
        }

        let descriptor = resolve_launch_descriptor(None).await?;
        let mut command = descriptor.command;
        command.extend(self.options.command.iter().skip(1).cloned());
        Ok(command)
    }

    /// Streams a sequence of outbound user-message frames to the child.
    /// Does not close stdin when the sequence is exhausted: the same pipe
    /// still carries control responses (permission round trips, interrupt
    /// acks) for the rest of the turn. Stdin is only closed by `close()`,
    /// or earlier in single-turn mode once a result message is observed.
    /// Initializes first if this is the first call.
    pub async fn stream_input(
        self: &Arc<Self>,
        messages: impl IntoIterator<Item = Value>,
    ) -> Result<(), SdkError> {
        self.initialize().await?;
        let channel = self.current_channel().await?;
        for message in messages {
            if self.cancellation.is_cancelled() {
                return Err(SdkError::Aborted);
            }
            channel.write(&message)?;
        }
        Ok(())
    }

    /// Awaits the next conversation message. Returns `None` once the
    /// sequence is exhausted (terminal done or terminal error already
    /// surfaced once).
    pub async fn recv(self: &Arc<Self>) -> Option<Result<AgentMessage, Arc<SdkError>>> {
        if *self.state.lock().await == State::New {
            if let Err(err) = self.initialize().await {
                return Some(Err(Arc::new(err)));
            }
        }

        let item = self.output.next().await;
        if let Some(Ok(message)) = &item {
            if let Some(session_id) = message.session_id() {
                let mut cached = self.session_id.lock().await;
                if cached.is_none() {
                    *cached = Some(session_id.to_string());
                }
            }
            if self.options.single_turn && message.is_result() {
                if let Some(channel) = self.channel.lock().await.as_ref() {
                    channel.end_input();
                }
            }
        }
        item
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.lock().await.clone()
    }

    pub async fn set_permission_callback(&self, callback: Option<crate::control::PermissionCallback>) {
        self.control.set_permission_callback(callback).await;
    }

    pub async fn set_tool_callback_timeout(&self, timeout: Duration) {
        self.control.set_tool_callback_timeout(timeout).await;
    }

    pub async fn set_control_request_timeout(&self, timeout: Duration) {
        self.control.set_control_request_timeout(timeout).await;
    }

    /// Sends the initial `initialize` control request/handshake with
    /// arbitrary capability data. Distinct from `initialize()` itself,
    /// which only spawns the child and the router.
    pub async fn send_initialize_handshake(
        self: &Arc<Self>,
        data: Value,
    ) -> Result<Value, SdkError> {
        let channel = self.current_channel().await?;
        self.control
            .send_request(&channel, ControlRequestType::Initialize, data)
            .await
    }

    /// Requests the list of commands the agent currently supports.
    pub async fn supported_commands(self: &Arc<Self>) -> Result<Value, SdkError> {
        let channel = self.current_channel().await?;
        self.control
            .send_request(&channel, ControlRequestType::SupportedCommands, Value::Null)
            .await
    }

    /// Sends an `interrupt` control request and awaits its acknowledgement.
    pub async fn interrupt(self: &Arc<Self>) -> Result<Value, SdkError> {
        let channel = self.current_channel().await?;
        self.control
            .send_request(&channel, ControlRequestType::Interrupt, Value::Null)
            .await
    }

    /// Sends a `set_permission_mode` control request.
    pub async fn set_permission_mode(self: &Arc<Self>, mode: PermissionMode) -> Result<Value, SdkError> {
        let channel = self.current_channel().await?;
        self.control
            .send_request(
                &channel,
                ControlRequestType::SetPermissionMode,
                serde_json::json!({ "mode": mode }),
            )
            .await
    }

    /// Sends a `set_model` control request.
    pub async fn set_model(self: &Arc<Self>, model: &str) -> Result<Value, SdkError> {
        let channel = self.current_channel().await?;
        self.control
            .send_request(
                &channel,
                ControlRequestType::SetModel,
                serde_json::json!({ "model": model }),
            )
            .await
    }

    pub async fn add_event_listener(
        &self,
        event: impl Into<String>,
        callback: EventCallback,
        once: bool,
    ) {
        self.listeners
            .lock()
            .await
            .entry(event.into())
            .or_default()
            .push(ListenerEntry { callback, once });
    }

    pub async fn remove_event_listener(&self, event: &str) {
        self.listeners.lock().await.remove(event);
    }

    pub(crate) async fn emit(&self, event: &str, payload: &Value) {
        let mut listeners = self.listeners.lock().await;
        let Some(entries) = listeners.get_mut(event) else {
            return;
        };
        for entry in entries.iter() {
            (entry.callback)(payload);
        }
        entries.retain(|entry| !entry.once);
    }

    async fn current_channel(&self) -> Result<Arc<ProcessChannel>, SdkError> {
        self.channel
            .lock()
            .await
            .clone()
            .ok_or(SdkError::Closed)
    }

    /// Idempotent: aborts pending control requests, closes the channel,
    /// and terminates the output sequence. Safe to call from any state,
    /// including before `initialize`.
    pub async fn close(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if *state == State::Closed {
            return;
        }
        let was_cancelled_before = self.cancellation.is_cancelled();
        *state = State::Closed;
        drop(state);

        debug!("closing query orchestrator");

        // Mark the output sequence terminal before firing cancellation: a
        // task blocked in `next()` races the cancellation wakeup against
        // this flag, and an explicit close() (was_cancelled_before == false)
        // must land on "done", not a fabricated abort.
        if was_cancelled_before {
            self.output.mark_error(SdkError::Aborted);
        } else {
            self.output.mark_done();
        }

        self.cancellation.cancel();
        self.control.reject_all(|| SdkError::Closed).await;

        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
        if let Some(router) = self.router_task.lock().await.take() {
            router.abort();
        }
        if let Some(watcher) = self.cancel_watcher.lock().await.take() {
            watcher.abort();
        }

        self.emit("close", &Value::Null).await;
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        self.options.working_dir.as_ref()
    }
}
