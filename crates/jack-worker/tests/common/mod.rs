//! Shared fixtures: an in-memory worker the test drives line by line, and a
//! small JSON protocol shaped like the recognition worker's.

#![allow(dead_code)]

use async_trait::async_trait;
use jack_worker::{
    LineProtocol, ProtocolError, Reply, WorkerChild, WorkerConfig, WorkerError, WorkerLauncher,
    WorkerProcess, WorkerResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::{mpsc, oneshot};

/// `{"text": ...}` / `{"error": ...}` replies, requests sent verbatim.
pub struct TextProtocol;

impl LineProtocol for TextProtocol {
    type Request = String;
    type Response = String;

    fn name(&self) -> &str {
        "text"
    }

    fn encode(&self, request: &String) -> Result<String, ProtocolError> {
        if request.is_empty() {
            return Err(ProtocolError("empty request".to_string()));
        }
        Ok(request.clone())
    }

    fn decode(&self, line: &str) -> Result<Reply<String>, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
            return Ok(Err(err.to_string()));
        }
        match value.get("text").and_then(|t| t.as_str()) {
            Some(text) => Ok(Ok(text.to_string())),
            None => Err(ProtocolError("missing text".to_string())),
        }
    }
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig::new("recognition", "fake-worker")
        .with_request_timeout(Duration::from_millis(15_000))
        .with_restart_backoff(Duration::from_millis(1_000))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// The test's end of one launched fake worker.
pub struct FakeWorker {
    pub generation: usize,
    requests: Option<Lines<BufReader<DuplexStream>>>,
    output: DuplexStream,
    exit: Option<oneshot::Sender<Option<i32>>>,
}

impl FakeWorker {
    /// Print one line on the worker's stdout.
    pub async fn send(&mut self, line: &str) {
        self.output
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("supervisor closed worker stdout");
    }

    /// Write raw bytes, which need not be valid UTF-8.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.output
            .write_all(bytes)
            .await
            .expect("supervisor closed worker stdout");
    }

    pub async fn ready(&mut self) {
        self.send("READY").await;
    }

    pub async fn reply_text(&mut self, text: &str) {
        self.send(&serde_json::json!({ "text": text }).to_string()).await;
    }

    /// Next request line written to the worker's stdin.
    pub async fn next_request(&mut self) -> Option<String> {
        match self.requests.as_mut() {
            Some(requests) => requests.next_line().await.ok().flatten(),
            None => None,
        }
    }

    /// Stop reading stdin; the supervisor's next write fails with a broken pipe.
    pub fn close_stdin(&mut self) {
        self.requests = None;
    }

    /// Close stdout and report `code` as the exit status.
    pub fn exit(mut self, code: i32) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(Some(code));
        }
    }
}

struct FakeChild {
    exit: oneshot::Receiver<Option<i32>>,
    killed: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkerChild for FakeChild {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        // A dropped FakeWorker behaves like a process killed by a signal.
        Ok((&mut self.exit).await.unwrap_or(None))
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    workers: mpsc::UnboundedSender<FakeWorker>,
    launches: Arc<AtomicUsize>,
    fail_launches: Arc<AtomicUsize>,
    killed: Arc<AtomicUsize>,
}

/// Test-side controls for a [`FakeLauncher`].
pub struct FakeWorkers {
    rx: mpsc::UnboundedReceiver<FakeWorker>,
    launches: Arc<AtomicUsize>,
    fail_launches: Arc<AtomicUsize>,
    killed: Arc<AtomicUsize>,
}

impl FakeWorkers {
    /// Wait for the supervisor to launch its next worker.
    pub async fn next(&mut self) -> FakeWorker {
        self.rx.recv().await.expect("launcher dropped")
    }

    pub fn try_next(&mut self) -> Option<FakeWorker> {
        self.rx.try_recv().ok()
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    /// Make the next `n` launches fail like a missing executable.
    pub fn fail_next_launches(&self, n: usize) {
        self.fail_launches.store(n, Ordering::SeqCst);
    }
}

pub fn fake_launcher() -> (FakeLauncher, FakeWorkers) {
    let (tx, rx) = mpsc::unbounded_channel();
    let launches = Arc::new(AtomicUsize::new(0));
    let fail_launches = Arc::new(AtomicUsize::new(0));
    let killed = Arc::new(AtomicUsize::new(0));
    (
        FakeLauncher {
            workers: tx,
            launches: Arc::clone(&launches),
            fail_launches: Arc::clone(&fail_launches),
            killed: Arc::clone(&killed),
        },
        FakeWorkers {
            rx,
            launches,
            fail_launches,
            killed,
        },
    )
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, config: &WorkerConfig) -> WorkerResult<WorkerProcess> {
        let generation = self.launches.fetch_add(1, Ordering::SeqCst) + 1;

        let failing = self
            .fail_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WorkerError::Spawn {
                program: config.program.clone(),
                reason: "No such file or directory".to_string(),
            });
        }

        let (stdin_ours, stdin_theirs) = tokio::io::duplex(64 * 1024);
        let (stdout_ours, stdout_theirs) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel();

        let worker = FakeWorker {
            generation,
            requests: Some(BufReader::new(stdin_theirs).lines()),
            output: stdout_theirs,
            exit: Some(exit_tx),
        };
        let _ = self.workers.send(worker);

        let child = FakeChild {
            exit: exit_rx,
            killed: Arc::clone(&self.killed),
        };
        Ok(WorkerProcess::new(
            Box::new(stdin_ours),
            Box::new(stdout_ours),
            Box::new(child),
        ))
    }
}
