//! Fire-and-forget invocation of the external post-processing command.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// What happened to one post-processing run. Only ever logged by the server.
#[derive(Debug)]
pub enum PostProcessReport {
    Completed {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    Failed(io::Error),
}

impl PostProcessReport {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { status, .. } if status.success())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    command: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl PostProcessor {
    pub fn new(command: Option<PathBuf>, timeout: Option<Duration>) -> Self {
        Self { command, timeout }
    }

    pub fn command(&self) -> Option<&Path> {
        self.command.as_deref()
    }

    /// Run `<command> <path>` in a detached task.
    ///
    /// Returns `None` when no command is configured. The handle is only for
    /// callers that want to observe the run; dropping it does not cancel it.
    pub fn invoke(&self, path: &Path) -> Option<JoinHandle<PostProcessReport>> {
        let command = self.command.clone()?;
        let path = path.to_path_buf();
        let timeout = self.timeout;
        Some(tokio::spawn(async move {
            run(&command, &path, timeout).await
        }))
    }
}

async fn run(command: &Path, path: &Path, timeout: Option<Duration>) -> PostProcessReport {
    debug!(command = %command.display(), path = %path.display(), "Running post-processing");

    let child = Command::new(command)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            error!(command = %command.display(), path = %path.display(), "Post-processing error: {}", e);
            return PostProcessReport::Failed(e);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = {
        let collect = async {
            let (stdout, stderr, status) =
                tokio::join!(read_pipe(stdout), read_pipe(stderr), child.wait());
            status.map(|status| (status, stdout, stderr))
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        }
    };

    // The child is not tied to this task: only an expired limit kills it.
    let Some(output) = finished else {
        if let Err(e) = child.kill().await {
            error!(path = %path.display(), "Failed to kill post-processing: {}", e);
        }
        error!(
            path = %path.display(),
            timeout_secs = timeout.map_or(0.0, |t| t.as_secs_f64()),
            "Post-processing timeout"
        );
        return PostProcessReport::TimedOut;
    };

    match output {
        Ok((status, stdout, stderr)) => {
            if status.success() {
                debug!(path = %path.display(), stdout = %stdout.trim(), "Post-processing successful");
            } else {
                error!(
                    path = %path.display(),
                    code = ?status.code(),
                    stderr = %stderr.trim(),
                    "Post-processing failed"
                );
            }
            PostProcessReport::Completed {
                status,
                stdout,
                stderr,
            }
        }
        Err(e) => {
            error!(path = %path.display(), "Post-processing error: {}", e);
            PostProcessReport::Failed(e)
        }
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Failed to read post-processing output: {}", e);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_command_is_noop() {
        let post = PostProcessor::default();
        assert!(post.invoke(Path::new("/tmp/anything.raw")).is_none());
    }

    #[tokio::test]
    async fn test_command_receives_path_as_first_argument() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("msg.raw");
        std::fs::write(&file, b"hello").unwrap();

        let post = PostProcessor::new(Some(PathBuf::from("/bin/cat")), None);
        let report = post.invoke(&file).unwrap().await.unwrap();

        assert!(report.is_success());
        match report {
            PostProcessReport::Completed { stdout, .. } => assert_eq!(stdout, "hello"),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_raised() {
        let post = PostProcessor::new(Some(PathBuf::from("/bin/false")), None);
        let report = post.invoke(Path::new("ignored.raw")).unwrap().await.unwrap();

        assert!(!report.is_success());
        assert!(matches!(report, PostProcessReport::Completed { .. }));
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let post = PostProcessor::new(Some(PathBuf::from("/nonexistent/postproc")), None);
        let report = post.invoke(Path::new("x.raw")).unwrap().await.unwrap();
        assert!(matches!(report, PostProcessReport::Failed(_)));
    }

    #[tokio::test]
    async fn test_hung_command_times_out() {
        // `sleep 5` with a 100ms limit; the "path" argument is the duration.
        let post = PostProcessor::new(
            Some(PathBuf::from("/bin/sleep")),
            Some(Duration::from_millis(100)),
        );
        let started = std::time::Instant::now();
        let report = post.invoke(Path::new("5")).unwrap().await.unwrap();

        assert!(matches!(report, PostProcessReport::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
