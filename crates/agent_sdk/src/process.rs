use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::Arc,
    time::Duration,
};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, Command},
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, trace, warn};

use crate::cancellation::CancellationHandle;
use crate::codec::{decode_line, encode_line};
use crate::error::SdkError;
use crate::stream::FramedStream;

const CHILD_EXIT_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_WAIT_EXIT_TIMEOUT: Duration = Duration::from_secs(30);

enum WriterMsg {
    Line(String),
    CloseInput,
}

/// Owns the child process and the two tasks that pump stream-json lines
/// across its stdin/stdout. Decoded lines are pushed onto a
/// [`FramedStream`] of raw [`Value`]s; classifying them into conversation
/// messages versus control frames is the demultiplexer's job, not this
/// transport's.
pub struct ProcessChannel {
    writer: mpsc::UnboundedSender<WriterMsg>,
    child: Arc<Mutex<Option<Child>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) raw_messages: Arc<FramedStream<Value>>,
    cancellation: CancellationHandle,
}

impl ProcessChannel {
    pub async fn spawn(
        mut command: Vec<String>,
        working_dir: Option<PathBuf>,
        env: BTreeMap<String, String>,
        cancellation: CancellationHandle,
        debug_io: bool,
    ) -> Result<Self, SdkError> {
        inject_protocol_flags(&mut command);

        let binary = command.first().cloned().unwrap_or_default();
        let mut cmd = Command::new(&binary);
        cmd.args(&command[1..]);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        if let Some(dir) = working_dir.as_ref() {
            cmd.current_dir(dir);
        }

        // Force unbuffered child output so line-oriented reads don't stall
        // behind the child's own stdio buffering.
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.env("UV_SYSTEM_PYTHON", "1");
        for (key, value) in &env {
            cmd.env(key, value);
        }

        let mut child = spawn_with_retry(&mut cmd, Path::new(&binary))?;

        let stdin = child.stdin.take().ok_or(SdkError::MissingStdin)?;
        let stdout = child.stdout.take().ok_or(SdkError::MissingStdout)?;
        let stderr = child.stderr.take();

        let raw_messages = Arc::new(FramedStream::new(cancellation.clone()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_task(stdin, writer_rx));
        let reader_handle = tokio::spawn(reader_task(stdout, raw_messages.clone()));
        let mut tasks = vec![writer_handle, reader_handle];
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr, debug_io)));
        }

        Ok(Self {
            writer: writer_tx,
            child: Arc::new(Mutex::new(Some(child))),
            tasks: Mutex::new(tasks),
            raw_messages,
            cancellation,
        })
    }

    pub fn write(&self, value: &Value) -> Result<(), SdkError> {
        if self.cancellation.is_cancelled() {
            return Err(SdkError::Aborted);
        }
        if self.raw_messages.is_terminal() {
            return Err(SdkError::Closed);
        }
        self.writer
            .send(WriterMsg::Line(encode_line(value)))
            .map_err(|_| SdkError::Closed)
    }

    pub fn end_input(&self) {
        let _ = self.writer.send(WriterMsg::CloseInput);
    }

    pub fn messages(&self) -> Arc<FramedStream<Value>> {
        self.raw_messages.clone()
    }

    /// Idempotent: cancels the writer, asks the child to exit, waits a
    /// bounded grace period, then forces termination.
    pub async fn close(&self) {
        self.end_input();

        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            match time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    debug!("agent process did not exit within grace period, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        *child_guard = None;
        drop(child_guard);

        self.raw_messages.mark_done();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Awaits the child's natural exit, bounded by `timeout` (default 30s)
    /// and by the shared cancellation handle. A non-zero exit status is
    /// reported as an error.
    pub async fn wait_exit(&self, timeout: Option<Duration>) -> Result<(), SdkError> {
        let timeout = timeout.unwrap_or(DEFAULT_WAIT_EXIT_TIMEOUT);
        let mut child_guard = self.child.lock().await;
        let Some(child) = child_guard.as_mut() else {
            return Ok(());
        };

        let status = tokio::select! {
            biased;
            status = child.wait() => status.map_err(SdkError::Wait)?,
            _ = self.cancellation.cancelled() => return Err(SdkError::Aborted),
            _ = time::sleep(timeout) => return Err(SdkError::WaitExitTimeout(timeout)),
        };

        check_exit_status(status)
    }
}

fn check_exit_status(status: ExitStatus) -> Result<(), SdkError> {
    if status.success() {
        Ok(())
    } else {
        Err(SdkError::NonZeroExit { status })
    }
}

fn has_flag(command: &[String], flag: &str) -> bool {
    command.iter().any(|arg| arg.contains(flag))
}

fn inject_protocol_flags(command: &mut Vec<String>) {
    if !has_flag(command, "--input-format") {
        command.push("--input-format".to_string());
        command.push("stream-json".to_string());
    }
    if !has_flag(command, "--output-format") {
        command.push("--output-format".to_string());
        command.push("stream-json".to_string());
    }
    if !has_flag(command, "--channel") {
        command.push("--channel=SDK".to_string());
    }
}

fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, SdkError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(SdkError::Spawn {
                    binary: binary.to_path_buf(),
                    source,
                });
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

async fn writer_task(
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Line(line) => {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            WriterMsg::CloseInput => break,
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(stdout: tokio::process::ChildStdout, raw_messages: Arc<FramedStream<Value>>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_line(&line) {
                    Ok(value) => {
                        trace!("decoded stream-json line");
                        if raw_messages.enqueue(value).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("dropping malformed stream-json line: {}", err.message);
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("error reading agent stdout: {err}");
                break;
            }
        }
    }
    raw_messages.mark_done();
}

async fn stderr_task(stderr: ChildStderr, mirror: bool) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if mirror {
            eprintln!("[agent stderr] {line}");
        } else {
            debug!("agent stderr: {line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_missing_protocol_flags_only_once() {
        let mut command = vec!["agent".to_string()];
        inject_protocol_flags(&mut command);
        assert!(command.contains(&"--input-format".to_string()));
        assert!(command.contains(&"--output-format".to_string()));
        assert!(command.iter().any(|a| a.contains("--channel")));
    }

    #[test]
    fn respects_caller_supplied_flags() {
        let mut command = vec![
            "agent".to_string(),
            "--input-format=stream-json".to_string(),
            "--channel=SDK".to_string(),
        ];
        inject_protocol_flags(&mut command);
        let input_format_count = command.iter().filter(|a| a.contains("--input-format")).count();
        assert_eq!(input_format_count, 1);
    }
}
