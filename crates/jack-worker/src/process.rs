//! Worker process handle: one child's command channel (stdin), event channel
//! (stdout lines), diagnostic channel (stderr) and exit status.
//!
//! `WorkerLauncher` is the seam the supervisor launches through. Production
//! code uses [`CommandLauncher`]; tests plug in in-memory pipes.

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub type WorkerInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type WorkerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Lifetime half of a worker: exit status and termination.
#[async_trait]
pub trait WorkerChild: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. `None` means it was terminated by a signal.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Ask the process to terminate without waiting.
    fn start_kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl WorkerChild for tokio::process::Child {
    fn id(&self) -> Option<u32> {
        tokio::process::Child::id(self)
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = tokio::process::Child::wait(self).await?;
        Ok(status.code())
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        tokio::process::Child::start_kill(self)
    }
}

/// A running worker and its streams. Owned exclusively by one supervisor.
pub struct WorkerProcess {
    stdin: WorkerInput,
    stdout: WorkerOutput,
    stderr: Option<WorkerOutput>,
    child: Box<dyn WorkerChild>,
}

impl WorkerProcess {
    pub fn new(stdin: WorkerInput, stdout: WorkerOutput, child: Box<dyn WorkerChild>) -> Self {
        Self {
            stdin,
            stdout,
            stderr: None,
            child,
        }
    }

    pub fn with_stderr(mut self, stderr: WorkerOutput) -> Self {
        self.stderr = Some(stderr);
        self
    }

    pub(crate) fn into_parts(
        self,
    ) -> (WorkerInput, WorkerOutput, Option<WorkerOutput>, Box<dyn WorkerChild>) {
        (self.stdin, self.stdout, self.stderr, self.child)
    }
}

/// Starts worker processes for a supervisor.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, config: &WorkerConfig) -> WorkerResult<WorkerProcess>;
}

/// Launches `config.program` as an OS process with piped standard streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl WorkerLauncher for CommandLauncher {
    fn launch(&self, config: &WorkerConfig) -> WorkerResult<WorkerProcess> {
        let spawn_err = |reason: String| WorkerError::Spawn {
            program: config.program.clone(),
            reason,
        };

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        for (key, extra) in &config.env_append {
            let base = config
                .env
                .get(key)
                .map(OsString::from)
                .or_else(|| std::env::var_os(key));
            cmd.env(key, append_path_list(base, extra));
        }

        let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        debug!(
            target: "jack::worker",
            service = %config.name,
            pid = ?child.id(),
            program = %config.program,
            "worker process spawned"
        );

        let mut process = WorkerProcess::new(Box::new(stdin), Box::new(stdout), Box::new(child));
        if let Some(stderr) = stderr {
            process = process.with_stderr(Box::new(stderr));
        }
        Ok(process)
    }
}

/// Append one entry to a path-list value (`a:b` + `c` -> `a:b:c`).
fn append_path_list(base: Option<OsString>, extra: &str) -> OsString {
    match base {
        Some(existing) if !existing.is_empty() => {
            let entries = std::env::split_paths(&existing).chain(std::iter::once(PathBuf::from(extra)));
            std::env::join_paths(entries).unwrap_or_else(|_| OsString::from(extra))
        }
        _ => OsString::from(extra),
    }
}

/// Write one request line and flush it through to the child.
pub(crate) async fn write_line(stdin: &mut WorkerInput, line: &str) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    stdin.write_all(&buf).await?;
    stdin.flush().await
}

/// Relay the worker's diagnostic channel into the log until it closes.
pub(crate) fn forward_stderr(service: String, stderr: WorkerOutput) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        warn!(target: "jack::worker::stderr", service = %service, "{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(target: "jack::worker::stderr", service = %service, error = %e, "stderr read failed");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_missing_variable_uses_entry() {
        assert_eq!(append_path_list(None, "/opt/pylib"), OsString::from("/opt/pylib"));
        assert_eq!(
            append_path_list(Some(OsString::new()), "/opt/pylib"),
            OsString::from("/opt/pylib")
        );
    }

    #[cfg(unix)]
    #[test]
    fn append_to_existing_variable_uses_separator() {
        let joined = append_path_list(Some(OsString::from("/usr/lib/py")), "/opt/pylib");
        assert_eq!(joined, OsString::from("/usr/lib/py:/opt/pylib"));
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let config = WorkerConfig::new("recognition", "/definitely/not/a/worker-binary");
        match CommandLauncher.launch(&config) {
            Err(WorkerError::Spawn { program, .. }) => {
                assert_eq!(program, "/definitely/not/a/worker-binary")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[tokio::test]
    async fn write_line_appends_newline() {
        let (client, server) = tokio::io::duplex(64);
        let mut input: WorkerInput = Box::new(client);
        write_line(&mut input, "/tmp/a.wav").await.unwrap();
        drop(input);
        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("/tmp/a.wav"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
