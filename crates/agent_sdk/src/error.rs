use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

/// Errors surfaced while driving the CLI agent process.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("agent binary not found: {0}")]
    BinaryNotFound(String),
    #[error("failed to spawn agent process (binary={binary:?}): {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("query was aborted")]
    Aborted,
    #[error("query is already closed")]
    Closed,
    #[error("control request `{subtype}` timed out after {timeout:?}")]
    ControlRequestTimeout { subtype: String, timeout: Duration },
    #[error("control request `{subtype}` was cancelled by the agent")]
    ControlRequestCancelled { subtype: String },
    #[error("control request `{subtype}` failed: {message}")]
    ControlRequestFailed { subtype: String, message: String },
    #[error("failed writing to agent stdin: {0}")]
    StdinWrite(#[source] std::io::Error),
    #[error("agent process exited with {status:?}")]
    NonZeroExit { status: ExitStatus },
    #[error("timed out waiting for agent process to exit after {0:?}")]
    WaitExitTimeout(Duration),
    #[error("failed waiting for agent process: {0}")]
    Wait(#[source] std::io::Error),
    #[error("internal error: missing stdin pipe")]
    MissingStdin,
    #[error("internal error: missing stdout pipe")]
    MissingStdout,
    #[error("failed to serialize control frame: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid query options: {0}")]
    InvalidOptions(String),
    #[error("{0}")]
    Validation(#[from] crate::validation::ValidationError),
}

pub type SdkResult<T> = Result<T, SdkError>;
