//! Locating and running external converters (Ghostscript, qpdf, LibreOffice).

use pdfdock_jobs::TaskFailure;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Maximum stderr captured from a tool, for error messages.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {tool}: {source}")]
    Wait {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} timed out after {}s", .elapsed.as_secs())]
    Timeout { tool: String, elapsed: Duration },

    #[error("{tool} exited with status {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },
}

impl From<ToolError> for TaskFailure {
    fn from(err: ToolError) -> Self {
        match err {
            // A tool that cannot be started is as good as missing.
            ToolError::Spawn { .. } => TaskFailure::dependency(err.to_string()),
            _ => TaskFailure::execution(err.to_string()),
        }
    }
}

/// Where external tools are looked up and how long they may run.
#[derive(Debug, Clone)]
pub struct Toolbox {
    search_path: Option<OsString>,
    timeout: Duration,
}

impl Toolbox {
    /// Look tools up on the process `PATH`.
    pub fn from_env(timeout: Duration) -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
            timeout,
        }
    }

    /// Look tools up on an explicit search path.
    pub fn with_search_path(search_path: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            search_path: Some(search_path.into()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// First of `names` found as an executable file on the search path.
    pub fn find(&self, names: &[&str]) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        let dirs: Vec<PathBuf> = std::env::split_paths(search_path).collect();
        names.iter().find_map(|name| {
            dirs.iter()
                .map(|dir| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
    }

    /// Run `program` to completion, killing it if it outlives the timeout.
    pub async fn run<I, S>(&self, program: &Path, args: I) -> Result<(), ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tool = tool_name(program);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(read_capped(stderr));

        tracing::debug!(%tool, "running external tool");
        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(ToolError::Wait { tool, source }),
            // The child is dropped here and killed.
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool,
                    elapsed: start.elapsed(),
                })
            }
        };

        if status.success() {
            tracing::debug!(%tool, elapsed_ms = start.elapsed().as_millis() as u64, "tool finished");
            return Ok(());
        }
        let stderr = stderr_task.await.unwrap_or_default();
        Err(ToolError::Failed {
            tool,
            code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        })
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(handle) = handle {
        let _ = handle.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
