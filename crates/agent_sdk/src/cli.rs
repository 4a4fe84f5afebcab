use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::process::Command;
use tokio::time;

use crate::error::SdkError;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const COMMON_INSTALL_LOCATIONS: &[&str] = &[
    "/usr/local/bin/qwen",
    "/opt/homebrew/bin/qwen",
    "/usr/bin/qwen",
];

const DEFAULT_BINARY_NAME: &str = "qwen";
const PACKAGE_RUNNER: &str = "npx";

/// How the resolved child should be launched: a concrete executable path,
/// or a package-manager runner command that will fetch/run it on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchKind {
    Path(PathBuf),
    Runner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    pub kind: LaunchKind,
    pub command: Vec<String>,
}

/// Resolves how to launch the CLI agent: an explicit path takes priority,
/// then a `PATH` lookup, then a short list of standard install locations,
/// then a package-manager runner probed with `--version` under a bounded
/// timeout. Only raises once every step has failed.
pub async fn resolve_launch_descriptor(
    explicit_path: Option<&Path>,
) -> Result<LaunchDescriptor, SdkError> {
    if let Some(path) = explicit_path {
        if path.is_absolute() && path.is_file() {
            return Ok(path_descriptor(path.to_path_buf()));
        }
        if let Some(found) = search_path(path.to_string_lossy().as_ref()) {
            return Ok(path_descriptor(found));
        }
    }

    if let Some(found) = search_path(DEFAULT_BINARY_NAME) {
        return Ok(path_descriptor(found));
    }

    for candidate in COMMON_INSTALL_LOCATIONS {
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return Ok(path_descriptor(candidate));
        }
    }

    if package_manager_runner_available().await {
        return Ok(LaunchDescriptor {
            kind: LaunchKind::Runner,
            command: vec![
                PACKAGE_RUNNER.to_string(),
                "--yes".to_string(),
                DEFAULT_BINARY_NAME.to_string(),
            ],
        });
    }

    Err(SdkError::BinaryNotFound(DEFAULT_BINARY_NAME.to_string()))
}

fn path_descriptor(path: PathBuf) -> LaunchDescriptor {
    let command = vec![path.to_string_lossy().into_owned()];
    LaunchDescriptor {
        kind: LaunchKind::Path(path),
        command,
    }
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

async fn package_manager_runner_available() -> bool {
    if search_path(PACKAGE_RUNNER).is_none() {
        return false;
    }
    if !Path::new("package.json").is_file() {
        return false;
    }
    probe_version(&[PACKAGE_RUNNER.to_string(), DEFAULT_BINARY_NAME.to_string()]).await
}

/// Runs `command --version` under a bounded timeout and reports whether it
/// exited successfully. Used both for runner probing and for exposing an
/// availability/version check to applications.
pub async fn probe_version(command: &[String]) -> bool {
    let Some(program) = command.first() else {
        return false;
    };
    let mut cmd = Command::new(program);
    cmd.args(&command[1..]);
    cmd.arg("--version");
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let Ok(mut child) = cmd.spawn() else {
        return false;
    };
    match time::timeout(VERSION_PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        _ => {
            let _ = child.start_kill();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_version_reports_false_for_missing_binary() {
        let found = probe_version(&["definitely-not-a-real-binary-xyz".to_string()]).await;
        assert!(!found);
    }

    #[tokio::test]
    async fn probe_version_reports_true_for_a_real_binary() {
        let found = probe_version(&["true".to_string()]).await;
        assert!(found);
    }
}
