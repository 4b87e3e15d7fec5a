//! Supervisor: owns one worker process and serializes callers into it.
//!
//! A single actor task owns the queue, the readiness gate and the worker
//! handle. Callers only hold a cheap [`Supervisor`] handle and talk to the
//! actor over a channel, so every mutation happens on one task and no lock
//! is needed. The actor reacts to five events:
//!
//! - a submitted request (enqueue, then drain),
//! - a worker stdout line (sentinel or reply, then drain),
//! - the worker exiting (reset gate, schedule restart),
//! - the in-flight request's deadline (fail it, then drain),
//! - the restart backoff elapsing (launch a new worker).

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::process::{forward_stderr, write_line, CommandLauncher, WorkerChild, WorkerInput, WorkerLauncher, WorkerOutput};
use crate::protocol::{check_single_line, LineProtocol};
use crate::queue::{OutcomeSender, RequestQueue};
use crate::router::{classify, LineEvent};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Externally visible lifecycle of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// A worker is running but has not printed the sentinel yet.
    Starting,
    /// The gate is open; requests are being dispatched.
    Ready,
    /// The worker exited; waiting out the backoff.
    Restarting,
    /// `max_restarts` exhausted. Terminal.
    Failed,
    /// Shut down. Terminal.
    Stopped,
}

/// Counters kept by the actor, readable from any handle.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    spawns: AtomicU64,
    restarts: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    dropped_lines: AtomicU64,
    pending: AtomicUsize,
}

/// Point-in-time copy of [`SupervisorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub spawns: u64,
    pub restarts: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    /// Output lines that were neither the sentinel nor a reply to an in-flight request.
    pub dropped_lines: u64,
    /// Requests currently queued, including the one in flight.
    pub pending: usize,
}

impl SupervisorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spawns: self.spawns.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            dropped_lines: self.dropped_lines.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of one submitted request. Resolves exactly once.
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket<T> {
    rx: oneshot::Receiver<WorkerResult<T>>,
}

impl<T> Future for Ticket<T> {
    type Output = WorkerResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(WorkerError::ShutDown)))
    }
}

enum Command<P: LineProtocol> {
    Submit {
        request: P::Request,
        outcome: OutcomeSender<P::Response>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a supervised worker. Cloning is cheap; all clones share one
/// worker and one queue. Dropping the last handle stops the worker.
pub struct Supervisor<P: LineProtocol> {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command<P>>,
    status: watch::Receiver<WorkerStatus>,
    stats: Arc<SupervisorStats>,
}

impl<P: LineProtocol> Clone for Supervisor<P> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            commands: self.commands.clone(),
            status: self.status.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<P: LineProtocol> Supervisor<P> {
    /// Launch `config.program` as an OS process and supervise it.
    /// Must be called from within a tokio runtime.
    pub fn start(config: WorkerConfig, protocol: P) -> Self {
        Self::spawn(config, protocol, CommandLauncher)
    }

    /// Supervise workers produced by `launcher`. The first worker is launched
    /// immediately.
    pub fn spawn<L: WorkerLauncher>(config: WorkerConfig, protocol: P, launcher: L) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Starting);
        let stats = Arc::new(SupervisorStats::default());
        let name: Arc<str> = Arc::from(config.name.as_str());

        let actor = Actor {
            queue: RequestQueue::new(config.max_queue_depth),
            config,
            protocol,
            launcher: Box::new(launcher),
            worker: None,
            ready: false,
            restart_at: None,
            failed_starts: 0,
            failed: false,
            status: status_tx,
            stats: Arc::clone(&stats),
            commands: commands_rx,
        };
        tokio::spawn(actor.run());

        Self {
            name,
            commands: commands_tx,
            status: status_rx,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request now and return a ticket for its outcome. Requests are
    /// queued in the order `submit` is called.
    pub fn submit(&self, request: P::Request) -> Ticket<P::Response> {
        let (outcome, rx) = oneshot::channel();
        // On a closed channel the outcome sender is dropped with the command,
        // which the ticket reports as `ShutDown`.
        let _ = self.commands.send(Command::Submit { request, outcome });
        Ticket { rx }
    }

    /// Queue a request and wait for its outcome. Outcomes resolve in
    /// submission order. There is no caller-side cancellation: dropping the
    /// future does not withdraw the request.
    pub async fn call(&self, request: P::Request) -> WorkerResult<P::Response> {
        self.submit(request).await
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn watch_status(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Resolve once the current worker has printed its sentinel.
    pub async fn wait_ready(&self) -> WorkerResult<()> {
        let mut rx = self.status.clone();
        loop {
            let status = *rx.borrow_and_update();
            match status {
                WorkerStatus::Ready => return Ok(()),
                WorkerStatus::Failed => {
                    return Err(WorkerError::Unavailable {
                        restarts: self.stats.snapshot().restarts as u32,
                    })
                }
                WorkerStatus::Stopped => return Err(WorkerError::ShutDown),
                WorkerStatus::Starting | WorkerStatus::Restarting => {}
            }
            rx.changed().await.map_err(|_| WorkerError::ShutDown)?;
        }
    }

    /// Stop the worker and fail every unresolved request with `ShutDown`.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Running {
    stdin: Option<WorkerInput>,
    lines: Lines<BufReader<WorkerOutput>>,
    child: Box<dyn WorkerChild>,
    stdout_closed: bool,
    pid: Option<u32>,
}

enum WorkerEvent {
    Line(String),
    /// A line that was not valid UTF-8.
    Garbled(std::io::Error),
    StdoutClosed,
    Exited(std::io::Result<Option<i32>>),
}

enum Event<P: LineProtocol> {
    Command(Command<P>),
    HandlesDropped,
    Worker(WorkerEvent),
    Deadline(u64),
    Restart,
}

struct Actor<P: LineProtocol> {
    config: WorkerConfig,
    protocol: P,
    launcher: Box<dyn WorkerLauncher>,
    queue: RequestQueue<P::Request, P::Response>,
    worker: Option<Running>,
    /// Readiness gate: set by the sentinel, cleared whenever the worker goes away.
    ready: bool,
    restart_at: Option<Instant>,
    /// Consecutive exits or spawn failures without reaching readiness.
    failed_starts: u32,
    failed: bool,
    status: watch::Sender<WorkerStatus>,
    stats: Arc<SupervisorStats>,
    commands: mpsc::UnboundedReceiver<Command<P>>,
}

impl<P: LineProtocol> Actor<P> {
    async fn run(mut self) {
        self.start_worker();

        loop {
            let deadline = self.queue.next_deadline();
            let restart_at = self.restart_at;

            // Worker output first: a line printed before a submit must never
            // resolve that submit.
            let event = tokio::select! {
                biased;
                ev = worker_event(&mut self.worker) => Event::Worker(ev),
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => Event::HandlesDropped,
                },
                _ = sleep_until_opt(deadline.map(|(_, at)| at)) => match deadline {
                    Some((id, _)) => Event::Deadline(id),
                    None => continue,
                },
                _ = sleep_until_opt(restart_at) => Event::Restart,
            };

            match event {
                Event::Command(Command::Submit { request, outcome }) => {
                    self.enqueue(request, outcome).await;
                }
                Event::Command(Command::Shutdown { done }) => {
                    self.stop();
                    let _ = done.send(());
                    break;
                }
                Event::HandlesDropped => {
                    self.stop();
                    break;
                }
                Event::Worker(WorkerEvent::Line(line)) => self.on_line(&line).await,
                Event::Worker(WorkerEvent::Garbled(e)) => {
                    SupervisorStats::bump(&self.stats.dropped_lines);
                    debug!(target: "jack::worker", service = %self.config.name, error = %e, "dropped non-UTF-8 output line");
                }
                Event::Worker(WorkerEvent::StdoutClosed) => {
                    if let Some(w) = self.worker.as_mut() {
                        w.stdout_closed = true;
                    }
                }
                Event::Worker(WorkerEvent::Exited(code)) => self.on_exit(code),
                Event::Deadline(id) => self.on_deadline(id).await,
                Event::Restart => {
                    self.restart_at = None;
                    self.start_worker();
                }
            }
            self.stats.pending.store(self.queue.len(), Ordering::Relaxed);
        }

        debug!(target: "jack::worker", service = %self.config.name, "supervisor stopped");
    }

    fn set_status(&self, status: WorkerStatus) {
        self.status.send_replace(status);
    }

    fn start_worker(&mut self) {
        SupervisorStats::bump(&self.stats.spawns);
        self.ready = false;

        match self.launcher.launch(&self.config) {
            Ok(process) => {
                let (stdin, stdout, stderr, child) = process.into_parts();
                if let Some(stderr) = stderr {
                    forward_stderr(self.config.name.clone(), stderr);
                }
                let pid = child.id();
                self.worker = Some(Running {
                    stdin: Some(stdin),
                    lines: BufReader::new(stdout).lines(),
                    child,
                    stdout_closed: false,
                    pid,
                });
                self.set_status(WorkerStatus::Starting);
                info!(
                    target: "jack::worker",
                    service = %self.config.name,
                    protocol = self.protocol.name(),
                    pid = ?pid,
                    "worker started; waiting for {}",
                    self.config.ready_sentinel
                );
            }
            Err(e) => {
                error!(target: "jack::worker", service = %self.config.name, error = %e, "worker failed to start");
                self.schedule_restart();
            }
        }
    }

    fn schedule_restart(&mut self) {
        self.failed_starts += 1;
        if let Some(max) = self.config.max_restarts {
            if self.failed_starts > max {
                self.give_up();
                return;
            }
        }
        SupervisorStats::bump(&self.stats.restarts);
        self.restart_at = Some(Instant::now() + self.config.restart_backoff);
        self.set_status(WorkerStatus::Restarting);
        info!(
            target: "jack::worker",
            service = %self.config.name,
            backoff_ms = self.config.restart_backoff.as_millis() as u64,
            attempt = self.failed_starts,
            "restart scheduled"
        );
    }

    fn give_up(&mut self) {
        self.failed = true;
        self.restart_at = None;
        let restarts = self.stats.snapshot().restarts as u32;
        self.set_status(WorkerStatus::Failed);
        error!(
            target: "jack::worker",
            service = %self.config.name,
            restarts,
            "restart limit reached; service unavailable"
        );
        for req in self.queue.drain_all() {
            SupervisorStats::bump(&self.stats.failed);
            req.resolve(Err(WorkerError::Unavailable { restarts }));
        }
    }

    async fn enqueue(&mut self, request: P::Request, outcome: OutcomeSender<P::Response>) {
        if self.failed {
            let restarts = self.stats.snapshot().restarts as u32;
            let _ = outcome.send(Err(WorkerError::Unavailable { restarts }));
            return;
        }
        match self.queue.push(request, outcome, Instant::now()) {
            Ok(id) => {
                debug!(target: "jack::worker", service = %self.config.name, id, queued = self.queue.len(), "request queued");
                self.drain().await;
            }
            Err((e, outcome)) => {
                warn!(target: "jack::worker", service = %self.config.name, error = %e, "request rejected");
                SupervisorStats::bump(&self.stats.failed);
                let _ = outcome.send(Err(e));
            }
        }
    }

    /// Dispatch the queue head if the gate is open and nothing is in flight.
    async fn drain(&mut self) {
        loop {
            if !self.ready || self.queue.is_empty() {
                return;
            }
            let Some(stdin) = self.worker.as_mut().and_then(|w| w.stdin.as_mut()) else {
                return;
            };
            let (id, encoded) = {
                let Some(head) = self.queue.start_head(Instant::now(), self.config.request_timeout) else {
                    return;
                };
                let encoded = self.protocol.encode(&head.payload).and_then(check_single_line);
                (head.id, encoded)
            };

            match encoded {
                Ok(line) => {
                    match write_line(stdin, &line).await {
                        Ok(()) => {
                            debug!(target: "jack::worker", service = %self.config.name, id, "request dispatched");
                        }
                        Err(e) => {
                            warn!(
                                target: "jack::worker",
                                service = %self.config.name,
                                id,
                                error = %e,
                                "write to worker failed; request kept for the next worker"
                            );
                            self.queue.requeue_in_flight();
                            self.abandon_worker();
                        }
                    }
                    return;
                }
                Err(e) => {
                    if let Some(req) = self.queue.pop_head() {
                        warn!(target: "jack::worker", service = %self.config.name, id, error = %e, "request could not be encoded");
                        SupervisorStats::bump(&self.stats.failed);
                        req.resolve(Err(WorkerError::Protocol(e.0)));
                    }
                }
            }
        }
    }

    /// Close the gate and kill the current worker; its exit drives the restart.
    fn abandon_worker(&mut self) {
        self.ready = false;
        if let Some(w) = self.worker.as_mut() {
            w.stdin = None;
            if let Err(e) = w.child.start_kill() {
                debug!(target: "jack::worker", service = %self.config.name, error = %e, "kill failed");
            }
        }
    }

    async fn on_line(&mut self, line: &str) {
        match classify(&self.protocol, &self.config.ready_sentinel, line) {
            LineEvent::Blank => {}
            LineEvent::Ready => {
                self.ready = true;
                self.failed_starts = 0;
                self.set_status(WorkerStatus::Ready);
                info!(
                    target: "jack::worker",
                    service = %self.config.name,
                    pid = ?self.worker.as_ref().and_then(|w| w.pid),
                    queued = self.queue.len(),
                    "worker is ready"
                );
                self.drain().await;
            }
            LineEvent::Reply(reply) => {
                match self.queue.take_in_flight() {
                    Some(req) => {
                        let elapsed = req.age(Instant::now());
                        match reply {
                            Ok(response) => {
                                SupervisorStats::bump(&self.stats.completed);
                                debug!(target: "jack::worker", service = %self.config.name, id = req.id, ?elapsed, "request completed");
                                req.resolve(Ok(response));
                            }
                            Err(message) => {
                                SupervisorStats::bump(&self.stats.failed);
                                warn!(target: "jack::worker", service = %self.config.name, id = req.id, error = %message, "worker reported an error");
                                req.resolve(Err(WorkerError::Worker(message)));
                            }
                        }
                    }
                    None => {
                        SupervisorStats::bump(&self.stats.dropped_lines);
                        debug!(target: "jack::worker", service = %self.config.name, line, "reply with no request in flight; dropped");
                    }
                }
                self.drain().await;
            }
            LineEvent::Noise(e) => {
                SupervisorStats::bump(&self.stats.dropped_lines);
                debug!(target: "jack::worker", service = %self.config.name, line, error = %e, "dropped unparseable output line");
            }
        }
    }

    fn on_exit(&mut self, code: std::io::Result<Option<i32>>) {
        let pid = self.worker.take().and_then(|w| w.pid);
        self.ready = false;
        match code {
            Ok(code) => warn!(target: "jack::worker", service = %self.config.name, pid = ?pid, ?code, "worker exited"),
            Err(e) => warn!(target: "jack::worker", service = %self.config.name, pid = ?pid, error = %e, "worker exit status unavailable"),
        }
        if let Some(id) = self.queue.requeue_in_flight() {
            info!(target: "jack::worker", service = %self.config.name, id, "in-flight request returned to the queue");
        }
        self.schedule_restart();
    }

    async fn on_deadline(&mut self, id: u64) {
        if let Some(req) = self.queue.expire(id) {
            SupervisorStats::bump(&self.stats.timeouts);
            SupervisorStats::bump(&self.stats.failed);
            warn!(
                target: "jack::worker",
                service = %self.config.name,
                id,
                timeout_ms = self.config.request_timeout.as_millis() as u64,
                "request timed out"
            );
            req.resolve(Err(WorkerError::Timeout {
                after: self.config.request_timeout,
            }));
        }
        self.drain().await;
    }

    fn stop(&mut self) {
        self.set_status(WorkerStatus::Stopped);
        self.ready = false;
        self.restart_at = None;
        if let Some(mut w) = self.worker.take() {
            if let Err(e) = w.child.start_kill() {
                debug!(target: "jack::worker", service = %self.config.name, error = %e, "kill failed");
            }
        }
        for req in self.queue.drain_all() {
            req.resolve(Err(WorkerError::ShutDown));
        }
        self.stats.pending.store(0, Ordering::Relaxed);
        info!(target: "jack::worker", service = %self.config.name, "supervisor shut down");
    }
}

/// Next event from the current worker: stdout lines until EOF, then its exit
/// status. Pending forever when no worker is running.
async fn worker_event(worker: &mut Option<Running>) -> WorkerEvent {
    let Some(w) = worker.as_mut() else {
        return std::future::pending().await;
    };
    if w.stdout_closed {
        return WorkerEvent::Exited(w.child.wait().await);
    }
    match w.lines.next_line().await {
        Ok(Some(line)) => WorkerEvent::Line(line),
        Ok(None) => WorkerEvent::StdoutClosed,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => WorkerEvent::Garbled(e),
        Err(_) => WorkerEvent::StdoutClosed,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
