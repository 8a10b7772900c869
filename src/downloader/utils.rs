// Helper functions shared by the extraction and media stages

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Failure to run an external binary to completion.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The binary does not exist (neither at the given path nor on `PATH`).
    #[error("{program} is not installed")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Run a command to completion with a wall-clock limit, capturing stdout and stderr.
///
/// Both pipes are drained concurrently so a chatty child cannot stall on a full
/// pipe buffer. On timeout the child is killed before returning.
pub async fn run_output_with_timeout<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    limit: Duration,
) -> Result<Output, ProcessError> {
    let name = program.display().to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: name.clone(),
                }
            } else {
                ProcessError::Spawn {
                    program: name.clone(),
                    source,
                }
            }
        })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, io::Error>(buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(|source| ProcessError::Io {
                program: name.clone(),
                source,
            })?;
            let stdout = join_pipe(stdout_task, &name).await?;
            let stderr = join_pipe(stderr_task, &name).await?;
            Ok(Output {
                status,
                stdout,
                stderr,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(ProcessError::TimedOut {
                program: name,
                secs: limit.as_secs(),
            })
        }
    }
}

async fn join_pipe(
    task: tokio::task::JoinHandle<io::Result<Vec<u8>>>,
    program: &str,
) -> Result<Vec<u8>, ProcessError> {
    match task.await {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(source)) => Err(ProcessError::Io {
            program: program.to_string(),
            source,
        }),
        Err(join) => Err(ProcessError::Io {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::Other, join.to_string()),
        }),
    }
}

/// Last non-empty lines of a process stream, for log lines and error details.
pub fn tail_lines(bytes: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Collapse whitespace and cap the result at `max_len` characters.
pub fn truncate_text(value: Option<&str>, max_len: usize, fallback: &str) -> String {
    let cleaned = match value {
        Some(v) => v.split_whitespace().collect::<Vec<_>>().join(" "),
        None => String::new(),
    };
    if cleaned.is_empty() {
        return fallback.to_string();
    }
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    let kept: String = cleaned.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Human-readable size: `12.3MB` below one gigabyte, `1.25GB` above.
pub fn format_bytes(num_bytes: u64) -> String {
    let megabytes = num_bytes as f64 / (1024.0 * 1024.0);
    if megabytes < 1024.0 {
        format!("{:.1}MB", megabytes)
    } else {
        format!("{:.2}GB", megabytes / 1024.0)
    }
}
